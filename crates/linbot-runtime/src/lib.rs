//! Linbot Runtime - orchestration layer for the Linbot dispatch core.
//!
//! This crate provides:
//! - Layered configuration (`ConfigLoader`, `LinbotConfig`)
//! - Logging setup (`LoggingBuilder`)
//! - Session routing between gateway connections and the dispatcher (`Session`)
//! - The runtime itself (`LinbotRuntime`)
//!
//! ```ignore
//! use linbot_runtime::LinbotRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = LinbotRuntime::builder()
//!         .plugin(my_plugin())
//!         .build()?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event_log;
pub mod logging;
pub mod runtime;
pub mod session;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, LinbotConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{LinbotRuntime, RuntimeBuilder};
pub use session::Session;

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros in one import.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
