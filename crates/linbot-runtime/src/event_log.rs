//! One log line per inbound event, shaped by category.

use linbot_core::{Event, MessageKind};
use tracing::{debug, info, warn};

/// Logs an inbound event received by `bot_id`.
pub fn log_event(bot_id: &str, event: &Event) {
    match event {
        Event::Message(MessageKind::Group(e)) => {
            info!(
                bot_id = %bot_id,
                group_id = e.group_id,
                user_id = e.user_id,
                sender = e.sender.display_name().unwrap_or_default(),
                message = %e.raw_message,
                "Group message"
            );
        }
        Event::Message(MessageKind::Private(e)) if e.is_temporary() => {
            info!(
                bot_id = %bot_id,
                user_id = e.user_id,
                message = %e.raw_message,
                "Temporary session message"
            );
        }
        Event::Message(MessageKind::Private(e)) => {
            info!(
                bot_id = %bot_id,
                user_id = e.user_id,
                sub_type = %e.sub_type,
                message = %e.raw_message,
                "Private message"
            );
        }
        Event::Message(MessageKind::Other(e)) => {
            info!(
                bot_id = %bot_id,
                message_type = %e.message_type,
                user_id = e.user_id,
                message = %e.raw_message,
                "Message"
            );
        }
        Event::MessageSent(kind) => {
            let e = kind.message();
            info!(
                bot_id = %bot_id,
                message_type = %e.message_type,
                group_id = event.group_id(),
                user_id = event.user_id(),
                message = %e.raw_message,
                "Message sent by bot"
            );
        }
        Event::Meta(e) if e.is_heartbeat() => {
            debug!(bot_id = %bot_id, "Heartbeat");
        }
        Event::Meta(e) => {
            info!(
                bot_id = %bot_id,
                meta_event_type = %e.meta_event_type,
                "Meta event"
            );
        }
        Event::Other(e) => {
            warn!(bot_id = %bot_id, post_type = %e.post_type, "Unsupported event");
        }
    }
}
