use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    acceptor,
    backup::{self, BackupPipeline},
    broadcast::Broadcaster,
    config::ServerConfig,
    registry::Registry,
};

/// Listening relay with its registry and backup task already running.
pub struct RelayServer {
    listener: TcpListener,
    registry: Registry,
    broadcaster: Broadcaster,
    backup_task: JoinHandle<()>,
}

impl RelayServer {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

        let registry = Registry::new();
        let (backup_tx, backup_rx) = backup::queue();
        let backup_task = BackupPipeline::new(backup_rx, config.backup.clone()).spawn();
        let broadcaster = Broadcaster::new(registry.clone(), backup_tx);

        Ok(Self {
            listener,
            registry,
            broadcaster,
            backup_task,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read listener address")
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Shutdown is abrupt: pending backup lines are discarded and live sessions
    /// are left to die with the runtime.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            registry,
            broadcaster,
            backup_task,
        } = self;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested; no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        tokio::spawn(acceptor::handle_connection(
                            stream,
                            peer_addr,
                            registry.clone(),
                            broadcaster.clone(),
                        ));
                    }
                    Err(err) => warn!(error = %err, "failed to accept connection"),
                },
            }
        }

        backup_task.abort();
        Ok(())
    }
}
