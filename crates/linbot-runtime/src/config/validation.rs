//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LinbotConfig, LogOutput, LoggingConfig, ServerConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &LinbotConfig) -> ConfigResult<()> {
    validate_server_config(&config.server)?;

    if config.api.timeout_secs == 0 {
        return Err(ConfigError::validation("API timeout must be greater than 0"));
    }

    validate_logging_config(&config.logging)?;

    if config.plugins.disabled.iter().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::validation(
            "Disabled plugin names cannot be empty",
        ));
    }

    Ok(())
}

fn validate_server_config(server: &ServerConfig) -> ConfigResult<()> {
    if server.host.is_empty() {
        return Err(ConfigError::validation("Server host cannot be empty"));
    }
    validate_port(server.port)?;
    validate_path(&server.path)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }
    if logging.filters.keys().any(|module| module.is_empty()) {
        return Err(ConfigError::validation("Log filter module cannot be empty"));
    }
    Ok(())
}

/// Validates a port number.
fn validate_port(port: u16) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(())
}

/// Validates a path.
fn validate_path(path: &str) -> ConfigResult<()> {
    if !path.starts_with('/') {
        return Err(ConfigError::validation("Path must start with '/'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&LinbotConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_server() {
        let mut config = LinbotConfig::default();
        config.server.port = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidPort(0))
        ));

        let mut config = LinbotConfig::default();
        config.server.path = "ws".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = LinbotConfig::default();
        config.api.timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = LinbotConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some(PathBuf::from("logs/linbot.log"));
        assert!(validate_config(&config).is_ok());
    }
}
