use std::{io, net::SocketAddr};

use futures_util::{Stream, StreamExt};
use metrics::counter;
use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_util::codec::LinesCodecError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    broadcast::Broadcaster,
    protocol,
    registry::Registry,
    session::Session,
};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("peer disconnected before choosing a nickname")]
    Disconnected,
    #[error("failed to read nickname: {0}")]
    Read(#[from] LinesCodecError),
    #[error("i/o error during nickname negotiation: {0}")]
    Io(#[from] io::Error),
}

/// Takes a freshly accepted connection through admission, negotiation and
/// its active life.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Registry,
    broadcaster: Broadcaster,
) {
    let connection_id = Uuid::new_v4();
    let (read_half, mut write_half) = stream.into_split();

    let color = match registry.admit(connection_id) {
        Ok(color) => color,
        Err(err) => {
            counter!("beach_bonfire_connections_rejected_total", 1);
            info!(peer = %peer_addr, error = %err, "rejecting connection");
            let notice = protocol::frame(protocol::CAPACITY_NOTICE);
            if let Err(err) = write_half.write_all(notice.as_bytes()).await {
                debug!(peer = %peer_addr, error = %err, "failed to send capacity notice");
            }
            if let Err(err) = write_half.shutdown().await {
                debug!(peer = %peer_addr, error = %err, "failed to close rejected connection");
            }
            return;
        }
    };
    counter!("beach_bonfire_connections_total", 1);
    info!(peer = %peer_addr, connection_id = %connection_id, color = %color, "connection made");

    let mut lines = protocol::read_lines(read_half);
    let nickname = match negotiate_nickname(&mut lines, &mut write_half).await {
        Ok(nickname) => nickname,
        Err(err) => {
            registry.remove(connection_id);
            debug!(connection_id = %connection_id, error = %err, "negotiation abandoned");
            return;
        }
    };

    Session::new(connection_id, &nickname, color)
        .run(lines, write_half, registry, broadcaster)
        .await;
}

/// Prompts until the peer sends an acceptable nickname.
///
/// There is no attempt limit and no timeout: a peer that never answers keeps
/// its slot until it disconnects. An over-long line ends negotiation.
pub async fn negotiate_nickname<S, W>(
    lines: &mut S,
    writer: &mut W,
) -> Result<String, NegotiationError>
where
    S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(protocol::frame(protocol::NICKNAME_PROMPT).as_bytes())
        .await?;

    loop {
        let line = lines.next().await.ok_or(NegotiationError::Disconnected)??;
        if let Some(nickname) = protocol::parse_nickname(&line) {
            return Ok(nickname.to_string());
        }
        counter!("beach_bonfire_nickname_rejected_total", 1);
        writer
            .write_all(protocol::frame(protocol::INVALID_NICKNAME_NOTICE).as_bytes())
            .await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    use crate::protocol::MAX_LINE_LENGTH;

    #[test_timeout::tokio_timeout_test]
    async fn reprompts_until_nickname_is_valid() {
        let (mut client, server) = duplex(4096);
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut lines = protocol::read_lines(server_read);

        client
            .write_all(b"\n   \n!!!\n  alice_1  \n")
            .await
            .expect("write");

        let nickname = negotiate_nickname(&mut lines, &mut server_write)
            .await
            .expect("negotiated");
        assert_eq!(nickname, "alice_1");

        drop(lines);
        drop(server_write);
        let mut transcript = String::new();
        client
            .read_to_string(&mut transcript)
            .await
            .expect("read transcript");
        let expected = format!(
            "{}\n{}\n{}\n{}\n",
            protocol::NICKNAME_PROMPT,
            protocol::INVALID_NICKNAME_NOTICE,
            protocol::INVALID_NICKNAME_NOTICE,
            protocol::INVALID_NICKNAME_NOTICE,
        );
        assert_eq!(transcript, expected);
    }

    #[test_timeout::tokio_timeout_test]
    async fn disconnect_during_negotiation_is_an_error() {
        let (mut client, server) = duplex(4096);
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut lines = protocol::read_lines(server_read);

        client.write_all(b"???\n").await.expect("write");
        client.shutdown().await.expect("shutdown");

        let err = negotiate_nickname(&mut lines, &mut server_write)
            .await
            .expect_err("peer left");
        assert!(matches!(err, NegotiationError::Disconnected));
    }

    #[test_timeout::tokio_timeout_test]
    async fn oversized_nickname_line_ends_negotiation() {
        let (mut client, server) = duplex(MAX_LINE_LENGTH * 2);
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut lines = protocol::read_lines(server_read);

        let mut oversized = vec![b'a'; MAX_LINE_LENGTH + 1];
        oversized.push(b'\n');
        client.write_all(&oversized).await.expect("write");

        let err = negotiate_nickname(&mut lines, &mut server_write)
            .await
            .expect_err("line exceeds the cap");
        assert!(matches!(
            err,
            NegotiationError::Read(LinesCodecError::MaxLineLengthExceeded)
        ));
    }
}
