//! Wire text exchanged with peers.
//!
//! Everything travels as newline-delimited UTF-8. Color markup such as
//! `[red]alice[white]` is a display hint for terminal clients; the relay never
//! parses it back.

use std::fmt;

use chrono::{DateTime, Local};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};

/// Sent right before a connection is closed because every slot is taken.
pub const CAPACITY_NOTICE: &str = "Server is full. Try again later.";
pub const NICKNAME_PROMPT: &str = "Welcome! Please choose a nickname: ";
pub const INVALID_NICKNAME_NOTICE: &str =
    "[red]Invalid nickname. Please choose another one.[white] ";

/// Client-side command that closes the connection. Never transmitted.
pub const QUIT_COMMAND: &str = ":quit";
/// Control token a client turns into an audible alert instead of printing.
pub const BEEP_TOKEN: &str = "$BEEP";

/// Longest inbound line, terminator excluded. Anything longer ends the
/// connection.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Inbound lines of a peer connection.
pub type LineStream<R> = FramedRead<R, LinesCodec>;

/// Splits `reader` into lines capped at [`MAX_LINE_LENGTH`].
pub fn read_lines<R: AsyncRead>(reader: R) -> LineStream<R> {
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
}

/// Markup tag that resets the foreground color after a nickname.
const RESET_TAG: &str = "white";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Green,
    Aqua,
    Yellow,
    Cyan,
    Pink,
    Lime,
    Purple,
    Gray,
}

/// Colors handed out to sessions in order of preference.
pub const PALETTE: [Color; 8] = [
    Color::Red,
    Color::Green,
    Color::Aqua,
    Color::Yellow,
    Color::Cyan,
    Color::Pink,
    Color::Lime,
    Color::Purple,
];

/// Assigned once every palette color is held. May be shared.
pub const OVERFLOW_COLOR: Color = Color::Gray;

impl Color {
    pub fn as_str(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Aqua => "aqua",
            Color::Yellow => "yellow",
            Color::Cyan => "cyan",
            Color::Pink => "pink",
            Color::Lime => "lime",
            Color::Purple => "purple",
            Color::Gray => "gray",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the nickname carried by `line` if it is acceptable.
///
/// Surrounding whitespace is ignored. What remains must contain at least one
/// ASCII letter, digit or underscore; other characters are allowed next to it.
pub fn parse_nickname(line: &str) -> Option<&str> {
    let candidate = line.trim();
    candidate
        .chars()
        .any(|c| c.is_ascii_alphanumeric() || c == '_')
        .then_some(candidate)
}

pub fn admission_confirmation(nickname: &str, color: Color) -> String {
    format!(
        "Your nickname is [{color}]{nickname}[{RESET_TAG}] and your color is [{color}]{color}[{RESET_TAG}]."
    )
}

/// Formats a chat line stamped with the current local time.
pub fn compose(color: Color, nickname: &str, payload: &str) -> String {
    compose_at(Local::now(), color, nickname, payload)
}

pub fn compose_at(at: DateTime<Local>, color: Color, nickname: &str, payload: &str) -> String {
    format!(
        "[{}] [{color}]{nickname}[{RESET_TAG}]: {payload}",
        at.format("%H:%M")
    )
}

/// Appends the line terminator used on the wire.
pub fn frame(line: &str) -> String {
    let mut framed = String::with_capacity(line.len() + 1);
    framed.push_str(line);
    framed.push('\n');
    framed
}
