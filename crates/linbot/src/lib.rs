//! # Linbot
//!
//! A dispatch core for OneBot v11 chat bots.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  frame  ┌─────────┐  event  ┌────────────┐  spawn  ┌──────────────────────┐
//! │ WsServer  │────────▶│ Session │────────▶│ Dispatcher │────────▶│ handler (own task,   │
//! │ (gateway) │◀────────│         │         │  Registry  │         │  own context)        │
//! └───────────┘  reply  └─────────┘         └────────────┘         └──────────┬───────────┘
//!       ▲                    │ echo                                           │ api::*
//!       │                    ▼                                                ▼
//!       └──────────── PendingRequests ◀──────────── Bot::call_api ◀───────────┘
//! ```
//!
//! - **Session**: one [`Bot`](prelude::Bot) per connection, routes replies and events
//! - **Registry**: ordered handlers, labelled by plugin
//! - **Dispatcher**: visits handlers in order, honours `block`, isolates faults
//! - **Context**: every handler sees its own event and bot through [`core::context`]
//! - **Correlation**: echo-tagged actions resolved by the matching reply
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use linbot::prelude::*;
//!
//! async fn echo(_event: EventContext<GroupMessageEvent>, args: CommandArgs) -> ApiResult<()> {
//!     api::send_group_msg(args.trimmed().to_string(), None).await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = LinbotRuntime::builder()
//!         .plugin(plugin_fn("echo", |r| {
//!             r.register(on_command("/echo"), echo);
//!             Ok(())
//!         }))
//!         .build()?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines
//! - `ws-server` *(default)*: reverse WebSocket server transport

pub use linbot_core as core;
pub use linbot_framework as framework;
pub use linbot_runtime as runtime;
pub use linbot_transport as transport;

/// Commonly used types for writing bots.
///
/// ```rust,ignore
/// use linbot::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use linbot_runtime::{LinbotConfig, LinbotRuntime};

    // Plugins and registration
    pub use linbot_framework::{BoxedPlugin, Plugin, Registry, plugin_fn};

    // Matchers
    pub use linbot_framework::{MatchResult, Matcher, on_command, on_message};

    // Extractors - for handler parameters
    pub use linbot_framework::{CommandArgs, EventContext};

    // Events
    pub use linbot_core::{
        Event, GroupMessageEvent, MessageEvent, MetaEvent, PrivateMessageEvent, Segment,
    };

    // Outbound actions
    pub use linbot_core::{ApiError, ApiResult, Bot, MessageContent, api, context};
}
