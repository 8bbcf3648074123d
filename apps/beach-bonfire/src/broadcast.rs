use std::sync::Arc;

use metrics::counter;
use tracing::{trace, warn};

use crate::{
    backup::BackupSender,
    protocol::{self, Color},
    registry::Registry,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Fans chat lines out to every active session and queues them for backup.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Registry,
    backup: BackupSender,
}

impl Broadcaster {
    pub fn new(registry: Registry, backup: BackupSender) -> Self {
        Self { registry, backup }
    }

    /// Composes `[HH:MM] [color]nickname[white]: payload` and broadcasts it.
    pub async fn relay(&self, color: Color, nickname: &str, payload: &str) -> BroadcastReport {
        self.broadcast(protocol::compose(color, nickname, payload))
            .await
    }

    /// Delivers `line` to the current membership, then enqueues it for backup.
    ///
    /// Each hand-off goes to the recipient's own writer task and never waits,
    /// so a stuck peer cannot hold up the rest. Recipients whose writer is gone
    /// are counted as dropped and otherwise ignored; their read loop reaps
    /// them. The backup enqueue waits for room in the queue.
    pub async fn broadcast(&self, line: String) -> BroadcastReport {
        let framed: Arc<str> = Arc::from(protocol::frame(&line));
        let mut report = BroadcastReport::default();

        for recipient in self.registry.snapshot() {
            if recipient.deliver(Arc::clone(&framed)) {
                report.delivered += 1;
            } else {
                report.dropped += 1;
                trace!(connection_id = %recipient.connection_id, "recipient writer closed");
            }
        }

        counter!("beach_bonfire_messages_broadcast_total", 1);
        if report.dropped > 0 {
            counter!(
                "beach_bonfire_deliveries_dropped_total",
                report.dropped as u64
            );
        }

        if self.backup.send(line).await.is_err() {
            warn!("backup pipeline stopped; message not queued for backup");
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn active(
        registry: &Registry,
        nickname: &str,
    ) -> mpsc::UnboundedReceiver<Arc<str>> {
        let id = Uuid::new_v4();
        registry.admit(id).expect("slot available");
        let (tx, rx) = mpsc::unbounded_channel();
        registry
            .activate(id, Arc::from(nickname), tx)
            .expect("admitted");
        rx
    }

    #[test_timeout::tokio_timeout_test]
    async fn delivers_once_to_every_active_session() {
        let registry = Registry::new();
        let (backup_tx, mut backup_rx) = backup::queue();
        let broadcaster = Broadcaster::new(registry.clone(), backup_tx);
        let mut receivers: Vec<_> = ["alice", "bob", "carol"]
            .into_iter()
            .map(|nick| active(&registry, nick))
            .collect();
        registry.admit(Uuid::new_v4()).expect("negotiating slot");

        let report = broadcaster.broadcast("hello".to_string()).await;
        assert_eq!(report, BroadcastReport { delivered: 3, dropped: 0 });

        for rx in &mut receivers {
            assert_eq!(rx.recv().await.as_deref(), Some("hello\n"));
            assert!(rx.try_recv().is_err());
        }
        assert_eq!(backup_rx.recv().await.as_deref(), Some("hello"));
    }

    #[test_timeout::tokio_timeout_test]
    async fn closed_recipient_does_not_block_the_others() {
        let registry = Registry::new();
        let (backup_tx, _backup_rx) = backup::queue();
        let broadcaster = Broadcaster::new(registry.clone(), backup_tx);

        let mut alice = active(&registry, "alice");
        drop(active(&registry, "ghost"));
        let mut bob = active(&registry, "bob");

        let report = broadcaster.broadcast("still here".to_string()).await;
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 1 });
        assert_eq!(alice.recv().await.as_deref(), Some("still here\n"));
        assert_eq!(bob.recv().await.as_deref(), Some("still here\n"));
    }

    #[test_timeout::tokio_timeout_test]
    async fn relay_formats_sender_identity() {
        let registry = Registry::new();
        let (backup_tx, mut backup_rx) = backup::queue();
        let broadcaster = Broadcaster::new(registry.clone(), backup_tx);
        let mut rx = active(&registry, "listener");

        broadcaster.relay(Color::Pink, "alice", "hi there").await;

        let line = rx.recv().await.expect("delivered");
        assert!(line.ends_with(" [pink]alice[white]: hi there\n"), "{line}");
        let backed_up = backup_rx.recv().await.expect("queued");
        assert_eq!(format!("{backed_up}\n"), &*line);
    }

    #[test_timeout::tokio_timeout_test]
    async fn full_backup_queue_holds_the_broadcaster() {
        let registry = Registry::new();
        let (backup_tx, mut backup_rx) = backup::queue();
        let broadcaster = Broadcaster::new(registry, backup_tx);

        for n in 0..backup::BACKUP_QUEUE_DEPTH {
            broadcaster.broadcast(format!("line {n}")).await;
        }

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            broadcaster.broadcast("overflow".to_string()),
        )
        .await;
        assert!(blocked.is_err(), "enqueue should wait for queue capacity");

        assert_eq!(backup_rx.recv().await.as_deref(), Some("line 0"));
        broadcaster.broadcast("after drain".to_string()).await;
    }
}
