//! Minimal line client for talking to a relay from a plain terminal.

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::{timeout, Duration},
};
use tracing::{debug, info};

use crate::protocol::{self, BEEP_TOKEN, QUIT_COMMAND};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const BELL: &str = "\x07";

#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Quit,
    Message(&'a str),
}

impl<'a> Input<'a> {
    pub fn parse(line: &'a str) -> Self {
        if line.trim() == QUIT_COMMAND {
            Input::Quit
        } else {
            Input::Message(line)
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ServerLine<'a> {
    Beep,
    Text(&'a str),
}

impl<'a> ServerLine<'a> {
    pub fn parse(line: &'a str) -> Self {
        if line.trim() == BEEP_TOKEN {
            ServerLine::Beep
        } else {
            ServerLine::Text(line)
        }
    }
}

/// Pipes stdin to the relay and relay output to stdout until either side
/// ends or the user types `:quit`.
pub async fn run(addr: &str) -> Result<()> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .with_context(|| format!("timed out connecting to {addr}"))?
        .with_context(|| format!("failed to connect to {addr}"))?;
    info!(addr, "connected");

    let (read_half, mut write_half) = stream.into_split();
    let mut server_lines = BufReader::new(read_half).lines();
    let mut input_lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    loop {
        tokio::select! {
            received = server_lines.next_line() => {
                let Some(line) = received.context("failed to read from relay")? else {
                    info!("relay closed the connection");
                    break;
                };
                let rendered = match ServerLine::parse(&line) {
                    ServerLine::Beep => BELL.to_string(),
                    ServerLine::Text(text) => protocol::frame(text),
                };
                stdout.write_all(rendered.as_bytes()).await?;
                stdout.flush().await?;
            }
            typed = input_lines.next_line() => {
                let Some(line) = typed.context("failed to read stdin")? else {
                    break;
                };
                match Input::parse(&line) {
                    Input::Quit => {
                        debug!("quit requested");
                        break;
                    }
                    Input::Message(text) => {
                        write_half
                            .write_all(protocol::frame(text).as_bytes())
                            .await
                            .context("failed to send message")?;
                    }
                }
            }
        }
    }

    let _ = write_half.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn quit_command_is_local() {
        assert_eq!(Input::parse(":quit"), Input::Quit);
        assert_eq!(Input::parse("  :quit "), Input::Quit);
        assert_eq!(Input::parse(":quitter"), Input::Message(":quitter"));
        assert_eq!(Input::parse("hello"), Input::Message("hello"));
    }

    #[test_timeout::timeout]
    fn beep_token_is_recognised() {
        assert_eq!(ServerLine::parse("$BEEP"), ServerLine::Beep);
        assert_eq!(
            ServerLine::parse("[10:00] [red]bob[white]: $BEEP"),
            ServerLine::Text("[10:00] [red]bob[white]: $BEEP")
        );
    }
}
