//! The bot handle: one gateway connection plus its pending-request table.
//!
//! # Usage
//!
//! ```rust,ignore
//! use linbot_core::{Bot, Event};
//!
//! async fn reply(bot: &Bot, event: &Event) {
//!     // Replies in the event's group, or privately to its sender.
//!     bot.send(event, "pong").await.ok();
//! }
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::connection::BoxedConnection;
use crate::correlation::{DEFAULT_TIMEOUT, PendingRequests};
use crate::error::{ApiError, ApiResult};
use crate::event::{Event, MessageKind, Segment};

// =============================================================================
// Wire Types
// =============================================================================

/// Outbound message content: a CQ string or a list of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Segments(Vec<Segment>),
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for MessageContent {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<Vec<Segment>> for MessageContent {
    fn from(segments: Vec<Segment>) -> Self {
        Self::Segments(segments)
    }
}

impl From<Segment> for MessageContent {
    fn from(segment: Segment) -> Self {
        Self::Segments(vec![segment])
    }
}

/// Reply document for an action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// `"ok"`, `"async"` or `"failed"`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub retcode: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub echo: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wording: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.retcode == 0
    }

    /// The `message_id` of a send action, if present.
    pub fn message_id(&self) -> Option<i64> {
        self.data.get("message_id").and_then(Value::as_i64)
    }
}

// =============================================================================
// Bot
// =============================================================================

/// A connected OneBot v11 account.
pub struct Bot {
    id: String,
    connection: BoxedConnection,
    pending: PendingRequests,
}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("id", &self.id)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Bot {
    /// Creates a bot with the default reply timeout.
    pub fn new(id: impl Into<String>, connection: BoxedConnection) -> Self {
        Self::with_timeout(id, connection, DEFAULT_TIMEOUT)
    }

    /// Creates a bot with a custom reply timeout.
    pub fn with_timeout(
        id: impl Into<String>,
        connection: BoxedConnection,
        timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            connection,
            pending: PendingRequests::with_timeout(timeout),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the pending-request table.
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Routes a reply frame to its waiting caller.
    pub fn deliver(&self, reply: &Value) -> bool {
        self.pending.deliver(reply)
    }

    /// Fails every waiting call; used when the connection goes away.
    pub fn disconnect(&self) -> usize {
        self.pending.clear()
    }

    /// Sends an action and waits for its reply.
    ///
    /// # Errors
    ///
    /// Besides the correlation failures, a reply with a non-zero `retcode`
    /// is reported as [`ApiError::Failed`].
    pub async fn call_api(&self, action: &str, params: Value) -> ApiResult<ApiResponse> {
        debug!(action = %action, bot_id = %self.id, "Calling OneBot API");

        let request = json!({
            "action": action,
            "params": params,
        });
        let reply = self.pending.send(self.connection.as_ref(), request).await?;
        let response: ApiResponse = serde_json::from_value(reply)?;

        if !response.is_ok() {
            let message = response
                .wording
                .clone()
                .or_else(|| response.message.clone())
                .unwrap_or_else(|| response.status.clone());
            return Err(ApiError::Failed {
                retcode: response.retcode,
                message,
            });
        }
        Ok(response)
    }

    /// Sends a message to a group.
    pub async fn send_group_msg(
        &self,
        group_id: i64,
        message: impl Into<MessageContent>,
    ) -> ApiResult<ApiResponse> {
        let message: MessageContent = message.into();
        self.call_api(
            "send_group_msg",
            json!({
                "group_id": group_id,
                "message": message,
            }),
        )
        .await
    }

    /// Sends a private message to a user.
    pub async fn send_private_msg(
        &self,
        user_id: i64,
        message: impl Into<MessageContent>,
    ) -> ApiResult<ApiResponse> {
        let message: MessageContent = message.into();
        self.call_api(
            "send_private_msg",
            json!({
                "user_id": user_id,
                "message": message,
            }),
        )
        .await
    }

    /// Replies to where `event` came from: its group, or its sender.
    pub async fn send(
        &self,
        event: &Event,
        message: impl Into<MessageContent>,
    ) -> ApiResult<ApiResponse> {
        if let Some(group_id) = event.group_id() {
            return self.send_group_msg(group_id, message).await;
        }
        match event {
            Event::Message(MessageKind::Private(e)) => {
                self.send_private_msg(e.user_id, message).await
            }
            _ => Err(ApiError::MissingSession("event has no group or user to reply to")),
        }
    }
}
