pub mod acceptor;
pub mod backup;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod telemetry;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use config::ServerConfig;
pub use registry::{Registry, RegistryError, MAX_SESSIONS};
pub use server::RelayServer;
