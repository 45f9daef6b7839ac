//! WebSocket transport.

#[cfg(feature = "ws-server")]
pub mod server;

#[cfg(feature = "ws-server")]
pub use server::{WsServer, WsServerConfig};
