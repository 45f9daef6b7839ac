//! Connection contract between transports and the runtime.
//!
//! A transport owns the socket and drives a receive loop; for every
//! connection it reports lifecycle callbacks to a [`ConnectionHandler`] and
//! hands out a [`ConnectionHandle`] that the correlation engine writes
//! outbound documents to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{TransportError, TransportResult};

// =============================================================================
// Connection
// =============================================================================

/// The outbound half of a gateway connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier of the bot on the other side.
    fn id(&self) -> &str;

    /// Transmits one JSON document.
    async fn send(&self, document: &Value) -> TransportResult<()>;
}

/// Shared connection trait object.
pub type BoxedConnection = Arc<dyn Connection>;

// =============================================================================
// Connection Handler
// =============================================================================

/// A handler for connection lifecycle events, driven by the transport.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Called when a new connection is established.
    ///
    /// Returns the bot id for this connection, or an error to reject it.
    async fn on_connect(&self, conn_info: ConnectionInfo) -> TransportResult<String>;

    /// Called once the outbound handle for the connection exists.
    async fn on_ready(&self, _bot_id: &str, _connection: ConnectionHandle) {}

    /// Called for every data frame received on the connection.
    async fn on_message(&self, bot_id: &str, data: &[u8]);

    /// Called when a connection is closed.
    async fn on_disconnect(&self, bot_id: &str);

    /// Called when a connection error occurs.
    async fn on_error(&self, bot_id: &str, error: &str);
}

/// Boxed connection handler.
pub type BoxedConnectionHandler = Arc<dyn ConnectionHandler>;

/// Information about a connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote address (if available).
    pub remote_addr: Option<String>,
    /// Connection protocol (ws, http, etc.).
    pub protocol: String,
    /// Additional metadata, such as selected request headers.
    pub metadata: HashMap<String, String>,
}

impl ConnectionInfo {
    /// Creates new connection info.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            remote_addr: None,
            protocol: protocol.into(),
            metadata: HashMap::new(),
        }
    }

    /// Sets the remote address.
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Adds metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Handle to a listener (server).
///
/// Dropping this handle stops the listener.
#[derive(Debug)]
pub struct ListenerHandle {
    /// Unique identifier for this listener.
    pub id: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ListenerHandle {
    /// Creates a new listener handle.
    pub fn new(id: impl Into<String>, shutdown_tx: oneshot::Sender<()>) -> Self {
        Self {
            id: id.into(),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Stops the listener.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Channel-backed handle to a live connection.
///
/// The transport's write loop drains the receiving end of `message_tx`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    message_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    /// Creates a new connection handle.
    pub fn new(
        id: impl Into<String>,
        message_tx: mpsc::Sender<Vec<u8>>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            id: id.into(),
            message_tx,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Queues raw bytes for the write loop.
    pub async fn send_raw(&self, data: Vec<u8>) -> TransportResult<()> {
        self.message_tx
            .send(data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Returns `true` once the write loop has gone away.
    pub fn is_closed(&self) -> bool {
        self.message_tx.is_closed()
    }

    /// Asks the transport to close this connection.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[async_trait]
impl Connection for ConnectionHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, document: &Value) -> TransportResult<()> {
        let data =
            serde_json::to_vec(document).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.send_raw(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_handle_sends_json() {
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let handle = ConnectionHandle::new("bot", tx, shutdown_tx);

        assert_ok!(handle.send(&json!({"action": "ping"})).await);
        let bytes = rx.recv().await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["action"], "ping");
        assert_eq!(Connection::id(&handle), "bot");
    }

    #[tokio::test]
    async fn test_handle_fails_after_close() {
        let (tx, rx) = mpsc::channel(1);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = ConnectionHandle::new("bot", tx, shutdown_tx);
        drop(rx);

        assert!(handle.is_closed());
        assert_err!(handle.send(&json!({})).await);

        handle.close();
        assert!(*shutdown_rx.borrow_and_update());
    }
}
