use anyhow::Result;
use beach_bonfire::{
    client,
    config::{Cli, Command},
    telemetry,
    RelayServer, ServerConfig,
};
use clap::Parser;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Connect(args)) = cli.command {
        telemetry::init("warn", None)?;
        return client::run(&args.addr).await;
    }

    let config = ServerConfig::try_from(cli.serve)?;
    telemetry::init("info", config.metrics_addr)?;
    info!(
        listen_addr = %config.listen_addr,
        backup_dir = %config.backup.directory.display(),
        backup_interval_secs = config.backup.interval.as_secs(),
        "starting beach-bonfire relay"
    );

    let server = RelayServer::bind(&config).await?;
    info!(addr = %server.local_addr()?, "server started");
    server.run_until(shutdown_signal()).await
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
