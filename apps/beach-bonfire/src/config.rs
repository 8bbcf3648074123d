use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use crate::backup::BackupConfig;

#[derive(Debug, Parser)]
#[command(
    name = "beach-bonfire",
    author,
    version,
    about = "Beach Bonfire line chat relay",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Join a running relay from this terminal.
    Connect(ConnectArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to bind the chat listener to.
    #[arg(
        long,
        env = "BEACH_BONFIRE_LISTEN_ADDR",
        default_value = "0.0.0.0:12345"
    )]
    pub listen_addr: String,

    /// Directory that receives the periodic message backups.
    #[arg(long, env = "BEACH_BONFIRE_BACKUP_DIR", default_value = ".")]
    pub backup_dir: PathBuf,

    /// Seconds between backup flushes.
    #[arg(
        long,
        env = "BEACH_BONFIRE_BACKUP_INTERVAL_SECS",
        default_value_t = 600
    )]
    pub backup_interval_secs: u64,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "BEACH_BONFIRE_METRICS_ADDR")]
    pub metrics_addr: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Relay to connect to.
    #[arg(long, env = "BEACH_BONFIRE_ADDR", default_value = "127.0.0.1:12345")]
    pub addr: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub backup: BackupConfig,
    pub metrics_addr: Option<SocketAddr>,
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;
        let metrics_addr = args
            .metrics_addr
            .map(|raw| {
                raw.parse::<SocketAddr>()
                    .with_context(|| format!("invalid metrics address: {raw}"))
            })
            .transpose()?;
        if args.backup_interval_secs == 0 {
            bail!("backup interval must be greater than zero");
        }

        Ok(ServerConfig {
            listen_addr,
            backup: BackupConfig {
                directory: args.backup_dir,
                interval: Duration::from_secs(args.backup_interval_secs),
            },
            metrics_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::DEFAULT_BACKUP_INTERVAL;

    fn serve_args(listen_addr: &str, interval: u64) -> ServeArgs {
        ServeArgs {
            listen_addr: listen_addr.to_string(),
            backup_dir: PathBuf::from("."),
            backup_interval_secs: interval,
            metrics_addr: None,
        }
    }

    #[test_timeout::timeout]
    fn default_interval_matches_backup_default() {
        let config = ServerConfig::try_from(serve_args("127.0.0.1:12345", 600)).expect("valid");
        assert_eq!(config.backup.interval, DEFAULT_BACKUP_INTERVAL);
        assert_eq!(config.listen_addr.port(), 12345);
        assert!(config.metrics_addr.is_none());
    }

    #[test_timeout::timeout]
    fn rejects_bad_addresses_and_zero_interval() {
        assert!(ServerConfig::try_from(serve_args("not-an-addr", 600)).is_err());
        assert!(ServerConfig::try_from(serve_args("127.0.0.1:0", 0)).is_err());

        let mut args = serve_args("127.0.0.1:0", 5);
        args.metrics_addr = Some("nope".into());
        assert!(ServerConfig::try_from(args).is_err());
    }

    #[test_timeout::timeout]
    fn parses_connect_subcommand() {
        let cli = Cli::try_parse_from(["beach-bonfire", "connect", "--addr", "10.0.0.2:4000"])
            .expect("parse");
        match cli.command {
            Some(Command::Connect(args)) => assert_eq!(args.addr, "10.0.0.2:4000"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn parses_server_flags_without_subcommand() {
        let cli = Cli::try_parse_from([
            "beach-bonfire",
            "--listen-addr",
            "127.0.0.1:7000",
            "--backup-interval-secs",
            "30",
        ])
        .expect("parse");
        assert!(cli.command.is_none());
        let config = ServerConfig::try_from(cli.serve).expect("valid");
        assert_eq!(config.backup.interval, Duration::from_secs(30));
    }
}
