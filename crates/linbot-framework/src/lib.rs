//! # Linbot Framework
//!
//! Handler registration and dispatch for Linbot bots.
//!
//! This layer provides:
//! - Handler trait for Axum-style dependency injection ([`Handler`], [`FromInvocation`])
//! - Matchers and the command language ([`on_message`], [`on_command`])
//! - The ordered handler [`Registry`] with per-plugin removal
//! - The [`Dispatcher`], which spawns matching handlers with fault isolation
//! - The [`Plugin`] contract and [`PluginLoader`]
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use linbot_framework::{CommandArgs, Dispatcher, EventContext, Registry, on_command};
//! use linbot_core::{api, GroupMessageEvent};
//!
//! async fn echo(_event: EventContext<GroupMessageEvent>, args: CommandArgs) -> linbot_core::ApiResult<()> {
//!     api::send_group_msg(args.trimmed(), None).await?;
//!     Ok(())
//! }
//!
//! let registry = Arc::new(Registry::new());
//! registry.register(on_command("/echo"), echo);
//! let dispatcher = Dispatcher::new(registry);
//! ```

pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod matcher;
pub mod plugin;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use error::{ExtractError, ExtractResult, HandlerError, HandlerResult};
pub use extractor::{CommandArgs, EventContext, FromInvocation, Invocation, Slot};
pub use handler::{
    BoxFuture, BoxedHandler, ErasedHandler, Handler, HandlerFn, IntoHandlerResult, into_handler,
};
pub use matcher::{MatchResult, Matcher, Predicate, command_match, on_command, on_message};
pub use plugin::{BoxedPlugin, FnPlugin, LoadReport, Plugin, PluginLoader, plugin_fn};
pub use registry::{HandlerId, PluginScope, Registration, Registry, Snapshot, UNKNOWN_PLUGIN};
