//! Echo-based request/reply correlation.
//!
//! Every outbound action is tagged with a fresh `echo` id and a single-slot
//! waiter is parked under that id *before* the document is transmitted. The
//! gateway copies `echo` into its reply; [`PendingRequests::deliver`] routes
//! the reply back to the parked caller.
//!
//! A waiter is resolved at most once. It is removed when the reply arrives,
//! when the timeout elapses, when transmission fails, or when the caller
//! gives up on the future. A reply for an id with no waiter is a stray: it is
//! logged and discarded.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::connection::Connection;
use crate::error::{ApiError, ApiResult};

/// Default time to wait for a reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Table of in-flight requests for one connection.
#[derive(Debug)]
pub struct PendingRequests {
    waiters: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    timeout: Duration,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    /// Creates an empty table using [`DEFAULT_TIMEOUT`].
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates an empty table with a custom reply timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Returns the reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of requests still waiting for a reply.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    /// Returns `true` if a waiter is parked under `echo`.
    pub fn contains(&self, echo: &str) -> bool {
        self.waiters.lock().contains_key(echo)
    }

    /// Parks a new waiter under an id that is not currently pending.
    ///
    /// Id generation and insertion happen under one lock.
    fn register(&self) -> (String, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        let echo = loop {
            let candidate = Uuid::new_v4().to_string();
            if !waiters.contains_key(&candidate) {
                break candidate;
            }
        };
        waiters.insert(echo.clone(), tx);
        (echo, rx)
    }

    fn remove(&self, echo: &str) -> Option<oneshot::Sender<Value>> {
        self.waiters.lock().remove(echo)
    }

    /// Sends `body` over `connection` and waits for the matching reply.
    ///
    /// `body` must be a JSON object; its `echo` field is overwritten.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Timeout`] if no reply arrives in time.
    /// - [`ApiError::Transport`] if the document cannot be transmitted.
    /// - [`ApiError::NotConnected`] if the table is cleared while waiting.
    pub async fn send(&self, connection: &dyn Connection, mut body: Value) -> ApiResult<Value> {
        let Some(object) = body.as_object_mut() else {
            return Err(ApiError::Serialization(
                "request body must be a JSON object".into(),
            ));
        };

        let (echo, rx) = self.register();
        let _guard = WaiterGuard {
            pending: self,
            echo: &echo,
        };
        object.insert("echo".into(), Value::String(echo.clone()));

        debug!(echo = %echo, bot_id = %connection.id(), "Sending request");
        trace!(request = %body, "Request body");

        connection.send(&body).await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => {
                trace!(echo = %echo, reply = %reply, "Reply received");
                Ok(reply)
            }
            Ok(Err(_)) => Err(ApiError::NotConnected),
            Err(_) => {
                debug!(echo = %echo, timeout = ?self.timeout, "Request timed out");
                Err(ApiError::Timeout)
            }
        }
    }

    /// Routes a reply frame to its waiter.
    ///
    /// Returns `true` if a waiter was resolved. Replies without a pending
    /// waiter (late, duplicate or unknown) are logged and dropped.
    pub fn deliver(&self, reply: &Value) -> bool {
        let echo = match reply.get("echo") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => return false,
            Some(other) => other.to_string(),
        };

        match self.remove(&echo) {
            Some(tx) => {
                if tx.send(reply.clone()).is_err() {
                    debug!(echo = %echo, "Caller stopped waiting before the reply arrived");
                    return false;
                }
                true
            }
            None => {
                warn!(echo = %echo, "Discarding reply for unknown echo (timed out?)");
                false
            }
        }
    }

    /// Drops every waiter; their callers observe [`ApiError::NotConnected`].
    ///
    /// Returns how many waiters were dropped.
    pub fn clear(&self) -> usize {
        let mut waiters = self.waiters.lock();
        let count = waiters.len();
        if count > 0 {
            debug!(count, "Clearing pending requests due to disconnect");
            waiters.clear();
        }
        count
    }
}

/// Removes the waiter when `send` returns or its future is dropped.
struct WaiterGuard<'a> {
    pending: &'a PendingRequests,
    echo: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.echo);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    use super::*;
    use crate::error::{TransportError, TransportResult};

    /// Forwards every sent document to a channel so the test can play gateway.
    struct ChannelConnection {
        tx: mpsc::UnboundedSender<Value>,
    }

    #[async_trait]
    impl Connection for ChannelConnection {
        fn id(&self) -> &str {
            "test"
        }

        async fn send(&self, document: &Value) -> TransportResult<()> {
            self.tx
                .send(document.clone())
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        }
    }

    struct BrokenConnection;

    #[async_trait]
    impl Connection for BrokenConnection {
        fn id(&self) -> &str {
            "broken"
        }

        async fn send(&self, _document: &Value) -> TransportResult<()> {
            Err(TransportError::ConnectionClosed {
                reason: "gone".into(),
            })
        }
    }

    fn connection() -> (ChannelConnection, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelConnection { tx }, rx)
    }

    #[tokio::test]
    async fn test_reply_resolves_waiter() {
        let pending = Arc::new(PendingRequests::new());
        let (conn, mut outbound) = connection();

        let gateway = {
            let pending = pending.clone();
            tokio::spawn(async move {
                let request = outbound.recv().await.unwrap();
                let reply = json!({
                    "status": "ok", "retcode": 0,
                    "data": {"message_id": 7}, "echo": request["echo"]
                });
                assert!(pending.deliver(&reply));
                reply
            })
        };

        let reply = pending
            .send(&conn, json!({"action": "send_group_msg", "params": {}}))
            .await
            .unwrap();
        let sent = gateway.await.unwrap();
        assert_eq!(reply, sent);
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_reply_is_stray() {
        let pending = PendingRequests::with_timeout(Duration::from_millis(50));
        let (conn, mut outbound) = connection();

        let result = pending.send(&conn, json!({"action": "x"})).await;
        assert!(matches!(result, Err(ApiError::Timeout)));
        assert!(pending.is_empty());

        let request = outbound.recv().await.unwrap();
        let late = json!({"status": "ok", "retcode": 0, "echo": request["echo"]});
        assert!(!pending.deliver(&late));
    }

    #[tokio::test]
    async fn test_second_reply_is_noop() {
        let pending = Arc::new(PendingRequests::new());
        let (conn, mut outbound) = connection();

        let gateway = {
            let pending = pending.clone();
            tokio::spawn(async move {
                let request = outbound.recv().await.unwrap();
                let first = json!({"retcode": 0, "data": 1, "echo": request["echo"]});
                let second = json!({"retcode": 0, "data": 2, "echo": request["echo"]});
                (pending.deliver(&first), pending.deliver(&second))
            })
        };

        let reply = assert_ok!(pending.send(&conn, json!({"action": "x"})).await);
        assert_eq!(reply["data"], 1);
        assert_eq!(gateway.await.unwrap(), (true, false));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let pending = PendingRequests::new();
        let mut seen = HashSet::new();
        let mut receivers = Vec::new();
        for _ in 0..1000 {
            let (echo, rx) = pending.register();
            assert!(seen.insert(echo));
            receivers.push(rx);
        }
        assert_eq!(pending.len(), 1000);
    }

    #[tokio::test]
    async fn test_send_failure_removes_waiter() {
        let pending = PendingRequests::new();
        let result = pending.send(&BrokenConnection, json!({"action": "x"})).await;
        assert!(matches!(result, Err(ApiError::Transport(_))));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_clear_fails_waiters() {
        let pending = Arc::new(PendingRequests::new());
        let (conn, mut outbound) = connection();

        let disconnect = {
            let pending = pending.clone();
            tokio::spawn(async move {
                outbound.recv().await.unwrap();
                pending.clear()
            })
        };

        let result = pending.send(&conn, json!({"action": "x"})).await;
        assert!(matches!(result, Err(ApiError::NotConnected)));
        assert_eq!(disconnect.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_non_object_body() {
        let pending = PendingRequests::new();
        let (conn, _outbound) = connection();
        let result = pending.send(&conn, json!("send_group_msg")).await;
        assert!(matches!(result, Err(ApiError::Serialization(_))));
    }

    #[test]
    fn test_reply_without_echo_is_ignored() {
        let pending = PendingRequests::new();
        assert!(!pending.deliver(&json!({"retcode": 0})));
        assert!(!pending.deliver(&json!({"retcode": 0, "echo": "nobody"})));
    }
}
