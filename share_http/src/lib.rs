//! Readiness-driven engine that sends one fixed HTTP/1.0 response to every
//! client that connects, moving the bytes with kernel zero-copy primitives.

pub mod accept;
pub mod connection;
pub mod error;
pub mod header;
pub mod payload;
pub mod server;
pub mod table;
pub mod transfer;

pub use connection::{ConnState, Connection};
pub use error::ServeError;
pub use payload::Payload;
pub use server::Server;
pub use table::{ConnId, HandleTable};
pub use transfer::{Kind, Progress, Strategy, Transfer};

use share_core::config::ServeConfig;
use std::sync::atomic::AtomicBool;

/// Build the engine from `cfg` and serve until `stop` is raised.
pub fn run_server(cfg: &ServeConfig, stop: &AtomicBool) -> Result<(), ServeError> {
    let mut server = Server::from_config(cfg)?;
    if let Ok(addr) = server.local_addr() {
        tracing::info!("listening on http://{addr}");
    }
    server.run(stop)
}
