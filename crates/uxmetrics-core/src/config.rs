//! TOML-based configuration.
//!
//! Selects which standard plugins a [`MetricFactory`](crate::MetricFactory)
//! installs and how the reporting transport behaves:
//!
//! ```toml
//! [reporter]
//! enabled = true
//! endpoint = "https://telemetry.example.com/v1/metrics"
//! flush_interval_ms = 1000
//!
//! [critical_resources]
//! extensions = ["js", "css", "woff2"]
//!
//! [layout_shift]
//! enabled = true
//! selector = "#results"
//! ```
//!
//! Every section and field is optional; missing values take their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::ConfigError;

/// Reporting transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReporterConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Where batches are POSTed. Required when `enabled`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

/// Critical-resource plugin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalResourcesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

/// Layout-shift plugin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutShiftConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_selector")]
    pub selector: String,
}

/// Navigation-timing plugin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Library configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reporter: ReporterConfig,
    #[serde(default)]
    pub critical_resources: CriticalResourcesConfig,
    #[serde(default)]
    pub layout_shift: LayoutShiftConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
}

// Default functions
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_extensions() -> Vec<String> {
    vec!["js".into(), "css".into()]
}
fn default_selector() -> String {
    "body".into()
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for CriticalResourcesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extensions: default_extensions(),
        }
    }
}

impl Default for LayoutShiftConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            selector: default_selector(),
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path`, or return the default configuration if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    /// Check cross-field constraints that deserialization cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reporter.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "reporter.flush_interval_ms".into(),
                message: "must be greater than zero".into(),
            });
        }

        match (&self.reporter.endpoint, self.reporter.enabled) {
            (Some(endpoint), _) => {
                let url = Url::parse(endpoint).map_err(|e| ConfigError::InvalidValue {
                    key: "reporter.endpoint".into(),
                    message: e.to_string(),
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidValue {
                        key: "reporter.endpoint".into(),
                        message: format!("unsupported scheme '{}'", url.scheme()),
                    });
                }
            }
            (None, true) => {
                return Err(ConfigError::InvalidValue {
                    key: "reporter.endpoint".into(),
                    message: "required when the reporter is enabled".into(),
                });
            }
            (None, false) => {}
        }

        if self.layout_shift.enabled && self.layout_shift.selector.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "layout_shift.selector".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }}
