//! Context-aware actions.
//!
//! These free functions act on the bot and event bound by
//! [`context::scope`](crate::context::scope), so handler code can reply
//! without holding a [`Bot`](crate::Bot) itself.

use serde_json::Value;

use crate::bot::{ApiResponse, MessageContent};
use crate::context;
use crate::error::{ApiError, ApiResult};

/// Sends a group message.
///
/// `group_id` defaults to the group of the event being handled.
///
/// # Errors
///
/// [`ApiError::NotConnected`] outside a dispatch with a bot attached;
/// [`ApiError::MissingSession`] when no group can be derived.
pub async fn send_group_msg(
    message: impl Into<MessageContent>,
    group_id: Option<i64>,
) -> ApiResult<ApiResponse> {
    let bot = context::current_bot().ok_or(ApiError::NotConnected)?;
    let group_id = group_id
        .or_else(|| context::current_event().and_then(|e| e.group_id()))
        .ok_or(ApiError::MissingSession("no group_id given and none on the current event"))?;
    bot.send_group_msg(group_id, message).await
}

/// Sends a private message.
///
/// `user_id` defaults to the sender of the event being handled.
pub async fn send_private_msg(
    message: impl Into<MessageContent>,
    user_id: Option<i64>,
) -> ApiResult<ApiResponse> {
    let bot = context::current_bot().ok_or(ApiError::NotConnected)?;
    let user_id = user_id
        .or_else(|| context::current_event().and_then(|e| e.user_id()))
        .ok_or(ApiError::MissingSession("no user_id given and none on the current event"))?;
    bot.send_private_msg(user_id, message).await
}

/// Replies to the event being handled.
pub async fn reply(message: impl Into<MessageContent>) -> ApiResult<ApiResponse> {
    let bot = context::current_bot().ok_or(ApiError::NotConnected)?;
    let event = context::current_event().ok_or(ApiError::MissingSession("no current event"))?;
    bot.send(&event, message).await
}

/// Calls an arbitrary action on the current bot.
pub async fn call_api(action: &str, params: Value) -> ApiResult<ApiResponse> {
    let bot = context::current_bot().ok_or(ApiError::NotConnected)?;
    bot.call_api(action, params).await
}
