//! # Linbot Core
//!
//! The protocol-facing half of the Linbot runtime.
//!
//! This crate provides:
//! - **Event Model**: OneBot v11 events with parent-in-child structs ([`Event`])
//! - **Connection Contract**: what a transport must offer ([`Connection`], [`ConnectionHandler`])
//! - **Correlation Engine**: echo-tagged request/reply matching ([`PendingRequests`])
//! - **Bot Handle**: OneBot actions over one connection ([`Bot`])
//! - **Context Propagation**: task-local "current event / current bot" ([`context`])
//!
//! ## Request Flow
//!
//! ```text
//! handler ──call_api──▶ PendingRequests ──{action,params,echo}──▶ gateway
//!    ▲                        │
//!    └──── reply ◀── deliver ◀┴──────────{status,retcode,echo}─── gateway
//! ```
//!
//! Handler registration and dispatch live in `linbot-framework`.

pub mod api;
pub mod bot;
pub mod connection;
pub mod context;
pub mod correlation;
pub mod error;
pub mod event;

pub use bot::{ApiResponse, Bot, MessageContent};
pub use connection::{
    BoxedConnection, BoxedConnectionHandler, Connection, ConnectionHandle, ConnectionHandler,
    ConnectionInfo, ListenerHandle,
};
pub use context::DispatchContext;
pub use correlation::{DEFAULT_TIMEOUT, PendingRequests};
pub use error::{ApiError, ApiResult, EventError, TransportError, TransportResult};
pub use event::{
    BaseEvent, Event, EventType, FromEvent, GroupMessageEvent, MessageEvent, MessageKind,
    MetaEvent, PostType, PrivateMessageEvent, Segment, Sender,
};
