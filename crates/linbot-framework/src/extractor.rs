//! Extractor system for the Linbot framework.
//!
//! Handler parameters are typed extractors. Each extractor type declares the
//! [`Slot`] it fills, so a handler's slot table is known from its signature
//! alone; the dispatcher uses that table for structural eligibility before
//! any argument is built.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use linbot_core::{Bot, Event, EventType, FromEvent};

use crate::error::{ExtractError, ExtractResult};

// =============================================================================
// Invocation
// =============================================================================

/// Everything a handler can draw arguments from for one call.
#[derive(Debug, Clone)]
pub struct Invocation {
    event: Arc<Event>,
    bot: Option<Arc<Bot>>,
    remainder: Option<String>,
}

impl Invocation {
    pub fn new(event: Arc<Event>) -> Self {
        Self {
            event,
            bot: None,
            remainder: None,
        }
    }

    pub fn with_bot(mut self, bot: Option<Arc<Bot>>) -> Self {
        self.bot = bot;
        self
    }

    /// Attaches the remainder produced by the matcher.
    pub fn with_remainder(mut self, remainder: Option<String>) -> Self {
        self.remainder = remainder;
        self
    }

    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    pub fn bot(&self) -> Option<&Arc<Bot>> {
        self.bot.as_ref()
    }

    pub fn remainder(&self) -> Option<&str> {
        self.remainder.as_deref()
    }
}

// =============================================================================
// Slots
// =============================================================================

/// What a handler parameter is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The dispatched event, projected to the given type.
    Event(EventType),
    /// The text left over after a command prefix.
    CommandArgs,
    /// The bot the event arrived on.
    Bot,
}

impl Slot {
    /// Returns the declared event type of an event slot.
    pub fn event_type(self) -> Option<EventType> {
        match self {
            Self::Event(ty) => Some(ty),
            _ => None,
        }
    }
}

// =============================================================================
// FromInvocation
// =============================================================================

/// A type that can be used as a handler parameter.
///
/// # Example
///
/// ```rust,ignore
/// use linbot_framework::{FromInvocation, Invocation, Slot, ExtractError};
///
/// struct SelfId(i64);
///
/// impl FromInvocation for SelfId {
///     const SLOT: Slot = Slot::Event(EventType::Any);
///
///     fn from_invocation(inv: &Invocation) -> Result<Self, ExtractError> {
///         Ok(SelfId(inv.event().base().self_id))
///     }
/// }
/// ```
pub trait FromInvocation: Sized {
    /// The slot this parameter occupies.
    const SLOT: Slot;

    /// Builds the argument. A failure is reported as a handler fault.
    fn from_invocation(inv: &Invocation) -> ExtractResult<Self>;
}

/// Optional parameters never fail; they are `None` when `T` cannot be built.
impl<T: FromInvocation> FromInvocation for Option<T> {
    const SLOT: Slot = T::SLOT;

    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        Ok(T::from_invocation(inv).ok())
    }
}

/// The whole event, whatever its variant.
impl FromInvocation for Arc<Event> {
    const SLOT: Slot = Slot::Event(EventType::Any);

    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        Ok(inv.event.clone())
    }
}

impl FromInvocation for Arc<Bot> {
    const SLOT: Slot = Slot::Bot;

    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        inv.bot.clone().ok_or(ExtractError::MissingBot)
    }
}

// =============================================================================
// EventContext
// =============================================================================

/// A typed view of the dispatched event.
///
/// Derefs to `T`, and through `T`'s own `Deref` chain to every ancestor:
///
/// ```rust,ignore
/// async fn on_group(event: EventContext<GroupMessageEvent>) {
///     println!("{} in {}: {}", event.user_id, event.group_id, event.raw_message);
/// }
/// ```
#[derive(Clone)]
pub struct EventContext<T> {
    inner: T,
    event: Arc<Event>,
}

impl<T> EventContext<T> {
    /// Returns the untyped event this view was taken from.
    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Deref for EventContext<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for EventContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl<T: FromEvent> FromInvocation for EventContext<T> {
    const SLOT: Slot = Slot::Event(T::EVENT_TYPE);

    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        T::from_event(&inv.event)
            .map(|inner| EventContext {
                inner,
                event: inv.event.clone(),
            })
            .ok_or_else(|| ExtractError::EventTypeMismatch {
                expected: std::any::type_name::<T>(),
                got: inv.event.name(),
            })
    }
}

// =============================================================================
// CommandArgs
// =============================================================================

/// The text after a command prefix.
///
/// For `on_command("/echo")` and the text `"/echo hi"` this is `" hi"`; a
/// bare `"/echo"` yields the single-space sentinel `" "`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArgs(pub String);

impl CommandArgs {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The arguments with surrounding whitespace removed.
    pub fn trimmed(&self) -> &str {
        self.0.trim()
    }
}

impl Deref for CommandArgs {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for CommandArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromInvocation for CommandArgs {
    const SLOT: Slot = Slot::CommandArgs;

    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        inv.remainder
            .clone()
            .map(CommandArgs)
            .ok_or(ExtractError::MissingCommandArgs)
    }
}

#[cfg(test)]
mod tests {
    use linbot_core::{GroupMessageEvent, MetaEvent, PrivateMessageEvent};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn group_invocation() -> Invocation {
        let event = Event::from_value(json!({
            "post_type": "message", "message_type": "group",
            "group_id": 9, "user_id": 3, "raw_message": "/echo hi"
        }))
        .unwrap();
        Invocation::new(Arc::new(event)).with_remainder(Some(" hi".into()))
    }

    #[test]
    fn test_event_context_derefs_through_parents() {
        let inv = group_invocation();
        let event = assert_ok!(EventContext::<GroupMessageEvent>::from_invocation(&inv));
        assert_eq!(event.group_id, 9);
        assert_eq!(event.user_id, 3);
        assert_eq!(event.raw_message, "/echo hi");
        assert!(Arc::ptr_eq(event.event(), inv.event()));
    }

    #[test]
    fn test_mismatched_event_type_fails() {
        let inv = group_invocation();
        let err = assert_err!(EventContext::<PrivateMessageEvent>::from_invocation(&inv));
        assert!(matches!(err, ExtractError::EventTypeMismatch { .. }));

        let optional = assert_ok!(Option::<EventContext<MetaEvent>>::from_invocation(&inv));
        assert!(optional.is_none());
    }

    #[test]
    fn test_command_args_and_bot() {
        let inv = group_invocation();
        let args = assert_ok!(CommandArgs::from_invocation(&inv));
        assert_eq!(args.as_str(), " hi");
        assert_eq!(args.trimmed(), "hi");

        let bare = Invocation::new(inv.event().clone());
        assert_err!(CommandArgs::from_invocation(&bare));
        assert!(matches!(
            Arc::<Bot>::from_invocation(&bare),
            Err(ExtractError::MissingBot)
        ));
    }

    #[test]
    fn test_slots() {
        assert_eq!(
            <EventContext<GroupMessageEvent>>::SLOT,
            Slot::Event(EventType::GroupMessage)
        );
        assert_eq!(<Arc<Event>>::SLOT, Slot::Event(EventType::Any));
        assert_eq!(<Option<CommandArgs>>::SLOT, Slot::CommandArgs);
        assert_eq!(Slot::Bot.event_type(), None);
    }
}
