//! Per-connection session routing.
//!
//! [`Session`] is the [`ConnectionHandler`] the runtime gives to the
//! transport. It keeps one [`Bot`] per live connection and routes each
//! inbound frame:
//!
//! - frames carrying `echo` are replies and go to the bot's pending-request
//!   table only
//! - every other frame is parsed into an [`Event`], logged, and dispatched
//!   inside a fresh dispatch context bound to the bot
//! - undecodable frames are logged and dropped; the connection stays up

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linbot_core::context::{self, DispatchContext};
use linbot_core::{
    Bot, ConnectionHandle, ConnectionHandler, ConnectionInfo, DEFAULT_TIMEOUT, Event,
    TransportError, TransportResult,
};
use linbot_framework::Dispatcher;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event_log::log_event;

/// Header the gateway uses to announce its account id.
pub const SELF_ID_HEADER: &str = "x-self-id";

/// A bot id claimed by a connection.
///
/// `on_connect` reserves the id; `on_ready` fills in the bot.
#[derive(Debug)]
enum BotSlot {
    Reserved,
    Ready(Arc<Bot>),
}

impl BotSlot {
    fn bot(&self) -> Option<&Arc<Bot>> {
        match self {
            Self::Reserved => None,
            Self::Ready(bot) => Some(bot),
        }
    }
}

/// Routes frames between connections and the dispatcher.
pub struct Session {
    dispatcher: Dispatcher,
    api_timeout: Duration,
    bots: RwLock<HashMap<String, BotSlot>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("bots", &self.bots.read().keys().collect::<Vec<_>>())
            .field("api_timeout", &self.api_timeout)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self::with_timeout(dispatcher, DEFAULT_TIMEOUT)
    }

    /// `api_timeout` bounds how long each bot waits for an action reply.
    pub fn with_timeout(dispatcher: Dispatcher, api_timeout: Duration) -> Self {
        Self {
            dispatcher,
            api_timeout,
            bots: RwLock::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn bot(&self, bot_id: &str) -> Option<Arc<Bot>> {
        self.bots.read().get(bot_id).and_then(BotSlot::bot).cloned()
    }

    /// Every connected bot.
    pub fn bots(&self) -> Vec<Arc<Bot>> {
        self.bots
            .read()
            .values()
            .filter_map(BotSlot::bot)
            .cloned()
            .collect()
    }

    /// Number of connected bots, not counting connections still starting up.
    pub fn bot_count(&self) -> usize {
        self.bots.read().values().filter(|slot| slot.bot().is_some()).count()
    }

    /// Routes one inbound frame from `bot`.
    pub async fn handle_frame(&self, bot: &Arc<Bot>, data: &[u8]) {
        let value: Value = match serde_json::from_slice(data) {
            Ok(value) => value,
            Err(e) => {
                warn!(bot_id = %bot.id(), error = %e, "Dropping malformed frame");
                return;
            }
        };

        if value.get("echo").is_some() {
            if !bot.deliver(&value) {
                debug!(bot_id = %bot.id(), "Reply was not awaited by anyone");
            }
            return;
        }

        let event = match Event::from_value(value) {
            Ok(event) => Arc::new(event),
            Err(e) => {
                warn!(bot_id = %bot.id(), error = %e, "Dropping frame that is not an event");
                return;
            }
        };

        log_event(bot.id(), &event);

        let ctx = DispatchContext::new(event.clone()).with_bot(bot.clone());
        context::scope(ctx, async { self.dispatcher.dispatch(event) }).await;
    }
}

/// Picks the bot id for a new connection: the announced account id, else the
/// remote address, else a random id.
fn bot_id_for(info: &ConnectionInfo) -> String {
    info.metadata
        .get(SELF_ID_HEADER)
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| info.remote_addr.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[async_trait]
impl ConnectionHandler for Session {
    async fn on_connect(&self, conn_info: ConnectionInfo) -> TransportResult<String> {
        let bot_id = bot_id_for(&conn_info);
        {
            let mut bots = self.bots.write();
            if bots.contains_key(&bot_id) {
                warn!(bot_id = %bot_id, "Bot is already connected, rejecting new connection");
                return Err(TransportError::ConnectionClosed {
                    reason: format!("bot {bot_id} is already connected"),
                });
            }
            bots.insert(bot_id.clone(), BotSlot::Reserved);
        }
        debug!(
            bot_id = %bot_id,
            remote_addr = conn_info.remote_addr.as_deref().unwrap_or("unknown"),
            protocol = %conn_info.protocol,
            "Accepted connection"
        );
        Ok(bot_id)
    }

    async fn on_ready(&self, bot_id: &str, connection: ConnectionHandle) {
        let bot = Arc::new(Bot::with_timeout(
            bot_id,
            Arc::new(connection),
            self.api_timeout,
        ));
        self.bots
            .write()
            .insert(bot_id.to_string(), BotSlot::Ready(bot));
        info!(bot_id = %bot_id, "Bot connected");
    }

    async fn on_message(&self, bot_id: &str, data: &[u8]) {
        let Some(bot) = self.bot(bot_id) else {
            warn!(bot_id = %bot_id, "Frame from unknown bot, dropping");
            return;
        };
        self.handle_frame(&bot, data).await;
    }

    async fn on_disconnect(&self, bot_id: &str) {
        let removed = self.bots.write().remove(bot_id);
        if let Some(BotSlot::Ready(bot)) = removed {
            let dropped = bot.disconnect();
            info!(bot_id = %bot_id, dropped_requests = dropped, "Bot disconnected");
        }
    }

    async fn on_error(&self, bot_id: &str, error: &str) {
        warn!(bot_id = %bot_id, error = %error, "Connection error");
    }
}

#[cfg(test)]
mod tests {
    use linbot_core::{ApiError, GroupMessageEvent, api};
    use linbot_framework::{CommandArgs, EventContext, Registry, on_command, on_message};
    use serde_json::json;
    use tokio::sync::{mpsc, watch};

    use super::*;

    fn connect_info(self_id: Option<&str>) -> ConnectionInfo {
        let info = ConnectionInfo::new("websocket").with_remote_addr("127.0.0.1:50000");
        match self_id {
            Some(id) => info.with_metadata(SELF_ID_HEADER, id),
            None => info,
        }
    }

    /// Connects a fake gateway and returns what the bot writes to it.
    async fn connect(session: &Session, self_id: &str) -> mpsc::Receiver<Vec<u8>> {
        let bot_id = session.on_connect(connect_info(Some(self_id))).await.unwrap();
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, _) = watch::channel(false);
        session
            .on_ready(&bot_id, ConnectionHandle::new(bot_id.clone(), tx, shutdown_tx))
            .await;
        rx
    }

    fn frame(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_bot_id_selection() {
        assert_eq!(bot_id_for(&connect_info(Some("10001"))), "10001");
        assert_eq!(bot_id_for(&connect_info(Some("  "))), "127.0.0.1:50000");
        assert_eq!(bot_id_for(&connect_info(None)), "127.0.0.1:50000");
        assert!(Uuid::parse_str(&bot_id_for(&ConnectionInfo::new("websocket"))).is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_bot_is_rejected() {
        let session = Session::new(Dispatcher::new(Arc::new(Registry::new())));
        let _rx = connect(&session, "10001").await;

        assert!(session.on_connect(connect_info(Some("10001"))).await.is_err());

        session.on_disconnect("10001").await;
        assert_eq!(session.bot_count(), 0);
        assert!(session.on_connect(connect_info(Some("10001"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_simultaneous_connects_reserve_the_id() {
        let session = Session::new(Dispatcher::new(Arc::new(Registry::new())));

        let first = session.on_connect(connect_info(Some("10001"))).await;
        let second = session.on_connect(connect_info(Some("10001"))).await;
        assert_eq!(first.unwrap(), "10001");
        assert!(second.is_err());
        assert_eq!(session.bot_count(), 0);
        assert!(session.bot("10001").is_none());

        let (tx, _rx) = mpsc::channel(16);
        let (shutdown_tx, _) = watch::channel(false);
        session
            .on_ready("10001", ConnectionHandle::new("10001", tx, shutdown_tx))
            .await;
        assert_eq!(session.bot_count(), 1);

        // Only the accepted connection ever reports a disconnect.
        session.on_disconnect("10001").await;
        assert_eq!(session.bot_count(), 0);
        assert!(session.on_connect(connect_info(Some("10001"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_echo_round_trip_through_session() {
        let registry = Arc::new(Registry::new());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        registry.register(
            on_command("/echo"),
            move |_event: EventContext<GroupMessageEvent>, args: CommandArgs| {
                let done_tx = done_tx.clone();
                async move {
                    let result = api::send_group_msg(args.trimmed().to_string(), None).await;
                    let _ = done_tx.send(result.map(|r| r.message_id()));
                }
            },
        );
        let session = Session::new(Dispatcher::new(registry));
        let mut outbound = connect(&session, "10001").await;

        session
            .on_message(
                "10001",
                &frame(json!({
                    "post_type": "message", "message_type": "group", "self_id": 10001,
                    "group_id": 100, "user_id": 200, "raw_message": "/echo hi"
                })),
            )
            .await;

        let request: Value = serde_json::from_slice(&outbound.recv().await.unwrap()).unwrap();
        assert_eq!(request["action"], "send_group_msg");
        assert_eq!(request["params"]["group_id"], 100);
        assert_eq!(request["params"]["message"], "hi");

        session
            .on_message(
                "10001",
                &frame(json!({
                    "status": "ok", "retcode": 0,
                    "data": {"message_id": 7}, "echo": request["echo"]
                })),
            )
            .await;

        assert_eq!(done_rx.recv().await.unwrap().unwrap(), Some(7));
        session.dispatcher().drain().await;
    }

    #[tokio::test]
    async fn test_bad_frames_do_not_stop_the_session() {
        let registry = Arc::new(Registry::new());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        registry.register(on_message(), move |event: Arc<Event>| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(event.raw_text().to_string());
            }
        });
        let session = Session::new(Dispatcher::new(registry));
        let _outbound = connect(&session, "10001").await;

        session.on_message("10001", b"{not json").await;
        session.on_message("10001", b"[1, 2]").await;
        session
            .on_message("10001", &frame(json!({"echo": "nobody-waits", "retcode": 0})))
            .await;
        session.on_message("unknown", &frame(json!({"post_type": "message"}))).await;
        session
            .on_message(
                "10001",
                &frame(json!({
                    "post_type": "message", "message_type": "private",
                    "user_id": 200, "raw_message": "still here"
                })),
            )
            .await;

        session.dispatcher().drain().await;
        assert_eq!(seen_rx.recv().await.unwrap(), "still here");
        assert!(seen_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_requests() {
        let registry = Arc::new(Registry::new());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        registry.register(on_message(), move || {
            let done_tx = done_tx.clone();
            async move {
                let _ = done_tx.send(api::call_api("get_status", json!({})).await);
            }
        });
        let session = Session::new(Dispatcher::new(registry));
        let mut outbound = connect(&session, "10001").await;

        session
            .on_message(
                "10001",
                &frame(json!({"post_type": "message", "message_type": "group", "group_id": 1})),
            )
            .await;
        let _request = outbound.recv().await.unwrap();

        session.on_disconnect("10001").await;
        let result = done_rx.recv().await.unwrap();
        assert!(matches!(result, Err(ApiError::NotConnected)));
    }
}
