//! OneBot v11 event model, **parent-in-child** design.
//!
//! Each child event struct contains its parent via `#[serde(flatten)]` and
//! implements `Deref` to it, so any child can transparently read all ancestor
//! fields:
//!
//! ```text
//! GroupMessageEvent  ──Deref──▶  MessageEvent  ──Deref──▶  BaseEvent
//!   group_id, group_name           user_id, raw_message, …   time, self_id, extra
//! ```
//!
//! # Event Hierarchy
//!
//! ```text
//! Event
//! ├── Message(MessageKind)       ← post_type = "message"
//! │   ├── Group(GroupMessageEvent)
//! │   ├── Private(PrivateMessageEvent)
//! │   └── Other(MessageEvent)    ← unrecognized message_type
//! ├── MessageSent(MessageKind)   ← post_type = "message_sent"
//! ├── Meta(MetaEvent)            ← post_type = "meta_event"
//! └── Other(BaseEvent)           ← anything else
//! ```
//!
//! Every key the model does not name is kept in [`BaseEvent::extra`], so
//! fields added by newer gateways survive a parse/serialize cycle.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::EventError;

// =============================================================================
// Post Types
// =============================================================================

/// Top-level category of an inbound event, taken from its `post_type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PostType {
    /// A message received by the bot.
    Message,
    /// A message sent by the bot itself, echoed back by the gateway.
    MessageSent,
    /// Heartbeats and lifecycle notifications.
    MetaEvent,
    /// Any other category (notice, request, …).
    Other(String),
}

impl PostType {
    /// Returns the wire name of this category.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::MessageSent => "message_sent",
            Self::MetaEvent => "meta_event",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for PostType {
    fn from(s: &str) -> Self {
        match s {
            "message" => Self::Message,
            "message_sent" => Self::MessageSent,
            "meta_event" => Self::MetaEvent,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Shared Types
// =============================================================================

/// Message sender information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    /// Group card (group nickname).
    #[serde(default)]
    pub card: Option<String>,
    /// Group role ("owner", "admin", "member").
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Source group of a temporary session.
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Sender {
    /// Card if set and non-empty, otherwise the nickname.
    pub fn display_name(&self) -> Option<&str> {
        self.card
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.nickname.as_deref())
    }
}

/// One element of a message: `{"type": "...", "data": {...}}`.
///
/// Segment data is kept opaque; only `text` segments are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Segment {
    /// Creates a plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text".into(), Value::String(text.into()));
        Self {
            kind: "text".into(),
            data,
        }
    }

    /// Returns the text of a `text` segment.
    pub fn as_text(&self) -> Option<&str> {
        if self.kind != "text" {
            return None;
        }
        self.data.get("text").and_then(Value::as_str)
    }
}

/// Accepts both the array form and the string form of `message`.
fn deserialize_message<'de, D>(deserializer: D) -> Result<Vec<Segment>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Segments(Vec<Segment>),
        Text(String),
    }

    Ok(match Option::<Wire>::deserialize(deserializer)? {
        Some(Wire::Segments(segments)) => segments,
        Some(Wire::Text(text)) if text.is_empty() => Vec::new(),
        Some(Wire::Text(text)) => vec![Segment::text(text)],
        None => Vec::new(),
    })
}

// =============================================================================
// Event Structs
// =============================================================================

/// Fields shared by every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseEvent {
    /// Unix timestamp when the event occurred.
    #[serde(default)]
    pub time: i64,
    /// The bot account the event was delivered to.
    #[serde(default)]
    pub self_id: i64,
    /// Category discriminator.
    pub post_type: String,
    /// Every field not named by the model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Message event with fields common to group and private messages.
///
/// `Deref` → [`BaseEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(flatten)]
    pub parent: BaseEvent,

    /// `"group"` or `"private"`.
    pub message_type: String,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub message_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default, deserialize_with = "deserialize_message")]
    pub message: Vec<Segment>,
    /// Raw message string (CQ codes or plain text).
    #[serde(default)]
    pub raw_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_format: Option<String>,
    #[serde(default)]
    pub font: i64,
    #[serde(default)]
    pub sender: Sender,
}

/// Group message event.
///
/// `Deref` chain: `GroupMessageEvent` → [`MessageEvent`] → [`BaseEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessageEvent {
    #[serde(flatten)]
    pub parent: MessageEvent,

    pub group_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

/// Private message event.
///
/// `sub_type` is `"friend"` for friends and `"group"` for temporary sessions
/// started from a group, in which case `sender.group_id` names that group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessageEvent {
    #[serde(flatten)]
    pub parent: MessageEvent,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<i64>,
}

impl PrivateMessageEvent {
    /// Returns `true` for a temporary session started from a group.
    pub fn is_temporary(&self) -> bool {
        self.sub_type == "group"
    }
}

/// Meta event (heartbeat, lifecycle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEvent {
    #[serde(flatten)]
    pub parent: BaseEvent,

    #[serde(default)]
    pub meta_event_type: String,
}

impl MetaEvent {
    pub fn is_heartbeat(&self) -> bool {
        self.meta_event_type == "heartbeat"
    }
}

macro_rules! impl_deref {
    ($child:ty => $parent:ty) => {
        impl Deref for $child {
            type Target = $parent;

            fn deref(&self) -> &Self::Target {
                &self.parent
            }
        }
    };
}

impl_deref!(MessageEvent => BaseEvent);
impl_deref!(GroupMessageEvent => MessageEvent);
impl_deref!(PrivateMessageEvent => MessageEvent);
impl_deref!(MetaEvent => BaseEvent);

// =============================================================================
// Event Enum
// =============================================================================

/// The concrete kind of a message event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageKind {
    Group(GroupMessageEvent),
    Private(PrivateMessageEvent),
    /// A `message_type` this model does not know.
    Other(MessageEvent),
}

impl MessageKind {
    /// Returns the common message fields.
    pub fn message(&self) -> &MessageEvent {
        match self {
            Self::Group(e) => &e.parent,
            Self::Private(e) => &e.parent,
            Self::Other(e) => e,
        }
    }

    fn from_value(value: Value) -> Result<Self, EventError> {
        let message_type = value.get("message_type").and_then(Value::as_str);
        Ok(match message_type {
            Some("group") => Self::Group(serde_json::from_value(value)?),
            Some("private") => Self::Private(serde_json::from_value(value)?),
            _ => Self::Other(serde_json::from_value(value)?),
        })
    }
}

/// An inbound occurrence pushed by the gateway.
///
/// Immutable once parsed; the dispatcher shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    Message(MessageKind),
    MessageSent(MessageKind),
    Meta(MetaEvent),
    Other(BaseEvent),
}

impl Event {
    /// Parses an event from a decoded JSON document.
    ///
    /// `post_type` selects the category; for message categories
    /// `message_type` selects the concrete variant.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        if !value.is_object() {
            return Err(EventError::NotAnObject);
        }
        let post_type = value
            .get("post_type")
            .and_then(Value::as_str)
            .map(PostType::from);

        Ok(match post_type {
            Some(PostType::Message) => Self::Message(MessageKind::from_value(value)?),
            Some(PostType::MessageSent) => Self::MessageSent(MessageKind::from_value(value)?),
            Some(PostType::MetaEvent) => Self::Meta(serde_json::from_value(value)?),
            _ => Self::Other(serde_json::from_value(value)?),
        })
    }

    /// Parses an event from raw frame bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, EventError> {
        let text = std::str::from_utf8(data)?;
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Returns the shared root fields.
    pub fn base(&self) -> &BaseEvent {
        match self {
            Self::Message(kind) | Self::MessageSent(kind) => &kind.message().parent,
            Self::Meta(e) => &e.parent,
            Self::Other(e) => e,
        }
    }

    /// Returns the raw `post_type` string.
    pub fn post_type(&self) -> &str {
        &self.base().post_type
    }

    /// Returns the parsed category.
    pub fn category(&self) -> PostType {
        PostType::from(self.post_type())
    }

    /// Returns the common message fields for both message categories.
    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            Self::Message(kind) | Self::MessageSent(kind) => Some(kind.message()),
            _ => None,
        }
    }

    /// Returns the raw text of a message event, or `""` for anything else.
    pub fn raw_text(&self) -> &str {
        self.as_message().map_or("", |m| m.raw_message.as_str())
    }

    /// Group the event happened in, if any.
    pub fn group_id(&self) -> Option<i64> {
        match self {
            Self::Message(MessageKind::Group(e)) | Self::MessageSent(MessageKind::Group(e)) => {
                Some(e.group_id)
            }
            _ => self.base().extra.get("group_id").and_then(Value::as_i64),
        }
    }

    /// User that caused the event, if any.
    pub fn user_id(&self) -> Option<i64> {
        match self.as_message() {
            Some(m) => Some(m.user_id),
            None => self.base().extra.get("user_id").and_then(Value::as_i64),
        }
    }

    /// Short `category.kind` label used in logs.
    pub fn name(&self) -> String {
        match self {
            Self::Message(kind) | Self::MessageSent(kind) => {
                format!("{}.{}", self.post_type(), kind.message().message_type)
            }
            Self::Meta(e) => format!("meta_event.{}", e.meta_event_type),
            Self::Other(e) => e.post_type.clone(),
        }
    }
}

// =============================================================================
// Typed Access
// =============================================================================

/// Event type a handler parameter asks for.
///
/// Satisfaction follows the variant hierarchy: [`Any`](EventType::Any)
/// accepts every event, [`Message`](EventType::Message) accepts received
/// messages of any kind, the leaf types accept only their own variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Any,
    Message,
    GroupMessage,
    PrivateMessage,
    Meta,
}

impl EventType {
    /// Returns `true` if an event of this runtime variant satisfies the type.
    pub fn accepts(self, event: &Event) -> bool {
        match self {
            Self::Any => true,
            Self::Message => matches!(event, Event::Message(_)),
            Self::GroupMessage => matches!(event, Event::Message(MessageKind::Group(_))),
            Self::PrivateMessage => matches!(event, Event::Message(MessageKind::Private(_))),
            Self::Meta => matches!(event, Event::Meta(_)),
        }
    }
}

/// Types that can be projected out of an [`Event`].
pub trait FromEvent: Clone + Send + Sync + 'static {
    /// The declared type used for eligibility checks.
    const EVENT_TYPE: EventType;

    /// Projects the event, returning `None` if the variant does not fit.
    fn from_event(event: &Event) -> Option<Self>;
}

impl FromEvent for Event {
    const EVENT_TYPE: EventType = EventType::Any;

    fn from_event(event: &Event) -> Option<Self> {
        Some(event.clone())
    }
}

impl FromEvent for MessageEvent {
    const EVENT_TYPE: EventType = EventType::Message;

    fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::Message(kind) => Some(kind.message().clone()),
            _ => None,
        }
    }
}

impl FromEvent for GroupMessageEvent {
    const EVENT_TYPE: EventType = EventType::GroupMessage;

    fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::Message(MessageKind::Group(e)) => Some(e.clone()),
            _ => None,
        }
    }
}

impl FromEvent for PrivateMessageEvent {
    const EVENT_TYPE: EventType = EventType::PrivateMessage;

    fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::Message(MessageKind::Private(e)) => Some(e.clone()),
            _ => None,
        }
    }
}

impl FromEvent for MetaEvent {
    const EVENT_TYPE: EventType = EventType::Meta;

    fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::Meta(e) => Some(e.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_message(raw: &str) -> Value {
        json!({
            "time": 1700000000,
            "self_id": 10001,
            "post_type": "message",
            "message_type": "group",
            "sub_type": "normal",
            "message_id": 42,
            "message_seq": 42,
            "user_id": 20002,
            "group_id": 30003,
            "group_name": "test group",
            "message": [{"type": "text", "data": {"text": raw}}],
            "raw_message": raw,
            "font": 14,
            "sender": {"user_id": 20002, "nickname": "alice", "card": "", "role": "member"},
            "raw_pb": "opaque"
        })
    }

    #[test]
    fn test_parse_group_message() {
        let event = Event::from_value(group_message("/echo hi")).unwrap();
        let Event::Message(MessageKind::Group(group)) = &event else {
            panic!("expected a group message, got {event:?}");
        };
        assert_eq!(group.group_id, 30003);
        assert_eq!(group.user_id, 20002);
        assert_eq!(group.self_id, 10001);
        assert_eq!(group.sender.display_name(), Some("alice"));
        assert_eq!(event.raw_text(), "/echo hi");
        assert_eq!(event.name(), "message.group");
        assert_eq!(event.group_id(), Some(30003));
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let event = Event::from_value(group_message("hi")).unwrap();
        let extra = &event.base().extra;
        assert_eq!(extra.get("raw_pb"), Some(&json!("opaque")));
        assert_eq!(extra.get("message_seq"), Some(&json!(42)));
        assert!(!extra.contains_key("group_id"));

        let round = serde_json::to_value(&event).unwrap();
        assert_eq!(round["raw_pb"], "opaque");
        assert_eq!(round["group_id"], 30003);
    }

    #[test]
    fn test_parse_private_temporary_session() {
        let event = Event::from_value(json!({
            "time": 1, "self_id": 1, "post_type": "message",
            "message_type": "private", "sub_type": "group",
            "user_id": 5, "raw_message": "hello", "message": "hello",
            "sender": {"user_id": 5, "nickname": "bob", "group_id": 77}
        }))
        .unwrap();
        let Event::Message(MessageKind::Private(private)) = &event else {
            panic!("expected a private message");
        };
        assert!(private.is_temporary());
        assert_eq!(private.sender.group_id, Some(77));
        assert_eq!(private.message, vec![Segment::text("hello")]);
    }

    #[test]
    fn test_parse_categories() {
        let sent = Event::from_value(json!({
            "post_type": "message_sent", "message_type": "group",
            "group_id": 1, "raw_message": "x"
        }))
        .unwrap();
        assert!(matches!(sent, Event::MessageSent(MessageKind::Group(_))));
        assert_eq!(sent.category(), PostType::MessageSent);

        let meta = Event::from_value(json!({
            "post_type": "meta_event", "meta_event_type": "heartbeat", "interval": 5000
        }))
        .unwrap();
        assert!(matches!(&meta, Event::Meta(m) if m.is_heartbeat()));
        assert_eq!(meta.raw_text(), "");

        let notice = Event::from_value(json!({
            "post_type": "notice", "notice_type": "group_increase", "group_id": 9, "user_id": 3
        }))
        .unwrap();
        assert!(matches!(notice, Event::Other(_)));
        assert_eq!(notice.group_id(), Some(9));
        assert_eq!(notice.user_id(), Some(3));

        let odd = Event::from_value(json!({"post_type": "message", "message_type": "guild"}))
            .unwrap();
        assert!(matches!(odd, Event::Message(MessageKind::Other(_))));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            Event::from_value(json!([1, 2])),
            Err(EventError::NotAnObject)
        ));
        assert!(Event::from_slice(b"{not json").is_err());
        assert!(Event::from_value(json!({"time": 1})).is_err());
    }

    #[test]
    fn test_event_type_hierarchy() {
        let group = Event::from_value(group_message("x")).unwrap();
        assert!(EventType::Any.accepts(&group));
        assert!(EventType::Message.accepts(&group));
        assert!(EventType::GroupMessage.accepts(&group));
        assert!(!EventType::PrivateMessage.accepts(&group));
        assert!(!EventType::Meta.accepts(&group));

        let sent = Event::from_value(json!({
            "post_type": "message_sent", "message_type": "group", "group_id": 1
        }))
        .unwrap();
        assert!(EventType::Any.accepts(&sent));
        assert!(!EventType::Message.accepts(&sent));
        assert!(GroupMessageEvent::from_event(&sent).is_none());
    }
}
