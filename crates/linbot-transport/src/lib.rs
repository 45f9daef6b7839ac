//! # Linbot Transport
//!
//! Transport implementations for Linbot.
//!
//! A transport accepts gateway connections and feeds their frames to a
//! [`ConnectionHandler`](linbot_core::ConnectionHandler). Outbound documents
//! travel back through the [`ConnectionHandle`](linbot_core::ConnectionHandle)
//! given to the handler when the connection is ready.
//!
//! # Features
//!
//! - `ws-server`: reverse WebSocket server, where the gateway connects to us
//!
//! # Example
//!
//! ```rust,ignore
//! use linbot_transport::websocket::{WsServer, WsServerConfig};
//!
//! let server = WsServer::new(WsServerConfig::default());
//! let listener = server.listen(handler).await?;
//! ```

pub mod websocket;

#[cfg(feature = "ws-server")]
pub use websocket::{WsServer, WsServerConfig};
