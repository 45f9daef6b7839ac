//! Configuration module for the Linbot runtime.
//!
//! Layered loading (defaults, files, `LINBOT_*` environment, overrides) and
//! validation of the listener, API, logging and plugin settings.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, PROFILE_ENV, Profile, load_config, load_config_from_file};
pub use schema::{
    ApiConfig, LinbotConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, PluginsConfig,
    ServerConfig, SpanEventConfig,
};
pub use validation::validate_config;
