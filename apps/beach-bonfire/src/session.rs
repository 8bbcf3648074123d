use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use metrics::{decrement_gauge, increment_gauge};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::codec::LinesCodecError;
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    protocol::{self, Color},
    registry::{ConnectionId, Registry},
};

/// A peer that finished nickname negotiation.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub nickname: Arc<str>,
    pub color: Color,
}

impl Session {
    pub fn new(connection_id: ConnectionId, nickname: &str, color: Color) -> Self {
        Self {
            connection_id,
            nickname: Arc::from(nickname),
            color,
        }
    }

    /// Drives the session from activation until the peer goes away.
    ///
    /// Three activities run side by side: the read loop (this future), a
    /// dispatch task relaying inbound lines in arrival order, and a writer
    /// task that owns the socket's write half. When reading stops the slot is
    /// released and the writer is stopped, which closes the connection.
    /// Lines already read are still relayed. A line over
    /// [`protocol::MAX_LINE_LENGTH`] counts as a read failure.
    pub async fn run<S, W>(
        self,
        mut lines: S,
        writer: W,
        registry: Registry,
        broadcaster: Broadcaster,
    ) where
        S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.connection_id;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        // Queued first so it precedes any broadcast, and only written once the
        // session is a recipient.
        let confirmation = protocol::admission_confirmation(&self.nickname, self.color);
        if outbound_tx
            .send(Arc::from(protocol::frame(&confirmation)))
            .is_err()
        {
            // `outbound_rx` is still held here, so this cannot happen.
            debug!(connection_id = %id, "outbound queue closed before activation");
        }

        if let Err(err) = registry.activate(id, Arc::clone(&self.nickname), outbound_tx) {
            warn!(connection_id = %id, error = %err, "session vanished before activation");
            return;
        }
        let writer_task = tokio::spawn(write_loop(id, writer, outbound_rx));
        increment_gauge!("beach_bonfire_sessions_active", 1.0);
        info!(
            connection_id = %id,
            nickname = %self.nickname,
            color = %self.color,
            active = registry.active_count(),
            "client connected"
        );

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(
            inbound_rx,
            broadcaster,
            self.color,
            Arc::clone(&self.nickname),
        ));

        loop {
            match lines.next().await {
                Some(Ok(line)) => {
                    if inbound_tx.send(line).is_err() {
                        break;
                    }
                }
                None => {
                    debug!(connection_id = %id, "peer closed connection");
                    break;
                }
                Some(Err(err)) => {
                    debug!(connection_id = %id, error = %err, "read failed");
                    break;
                }
            }
        }

        if registry.remove(id) {
            decrement_gauge!("beach_bonfire_sessions_active", 1.0);
        }
        writer_task.abort();
        info!(connection_id = %id, nickname = %self.nickname, "client disconnected");
    }
}

async fn dispatch_loop(
    mut inbound: mpsc::UnboundedReceiver<String>,
    broadcaster: Broadcaster,
    color: Color,
    nickname: Arc<str>,
) {
    while let Some(line) = inbound.recv().await {
        broadcaster.relay(color, &nickname, &line).await;
    }
}

async fn write_loop<W>(
    id: ConnectionId,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Arc<str>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(framed) = outbound.recv().await {
        if let Err(err) = writer.write_all(framed.as_bytes()).await {
            debug!(connection_id = %id, error = %err, "write failed; dropping further output");
            break;
        }
    }
}
