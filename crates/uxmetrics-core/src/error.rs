//! Core error types for uxmetrics-core.
//!
//! Lifecycle misuse (double start, stop without start, registering a plugin
//! twice) is never an error value: those calls are ignored and logged. The
//! types here cover the places where a caller can act on a failure:
//! plugin handlers, configuration and the reporting transport.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for uxmetrics-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Plugin handler errors
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport-related errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by a plugin while handling a lifecycle event.
///
/// These never reach the caller of `start`/`stop`/`reset`; the dispatcher
/// logs them and carries on with the next handler.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The handler could not complete
    #[error("Plugin '{plugin}' failed: {message}")]
    Failed { plugin: String, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Reporting transport errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No endpoint configured for the transport
    #[error("No reporting endpoint configured")]
    NoEndpoint,

    /// The configured endpoint is not a valid URL
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// The HTTP request could not be sent
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("Endpoint responded with HTTP {status}")]
    Status { status: u16 },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseFailed(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_error_converts_into_core_error() {
        let err: CoreError = PluginError::Failed {
            plugin: "layout-shift".into(),
            message: "selector matched nothing".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Plugin error: Plugin 'layout-shift' failed: selector matched nothing"
        );
    }

    #[test]
    fn toml_error_becomes_parse_failed() {
        let err = toml::from_str::<toml::Value>("not = [valid").unwrap_err();
        let err: ConfigError = err.into();
        assert!(matches!(err, ConfigError::ParseFailed(_)));
    }
}
