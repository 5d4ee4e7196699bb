//! Bus configuration loaded from TOML.
//!
//! ```toml
//! bus = "session"
//! introspect_attempts = 5
//! introspect_delay_ms = 500
//! call_timeout_ms = 10000
//! log_level = "debug"
//! ```

mod error;
mod log_level;
mod paths;

pub use error::ConfigError;
pub use log_level::LogLevel;
pub use paths::ConfigPaths;

use std::{fs, io::ErrorKind, path::Path, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dbus::IntrospectPolicy;

/// Which message bus to connect to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// The system bus, where hardware and system services live.
    #[default]
    System,
    /// The per-user session bus.
    Session,
}

/// Framework configuration. Every field has a default, so an empty file is
/// valid.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    /// Bus to connect to.
    pub bus: BusKind,

    /// Introspection attempts before giving up, including the first one.
    pub introspect_attempts: u32,

    /// Delay between introspection attempts in milliseconds.
    pub introspect_delay_ms: u64,

    /// Per-call reply timeout in milliseconds.
    pub call_timeout_ms: u64,

    /// Log level used when `RUST_LOG` is not set.
    pub log_level: LogLevel,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::System,
            introspect_attempts: 3,
            introspect_delay_ms: 3000,
            call_timeout_ms: 25_000,
            log_level: LogLevel::Info,
        }
    }
}

impl BusConfig {
    /// Loads the configuration at `path`. A missing file yields defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// holds out-of-range values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    details: err.to_string(),
                });
            }
        };

        let config: BusConfig =
            toml::from_str(&content).map_err(|e| ConfigError::toml_parse(e, Some(path)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from the default location.
    ///
    /// # Errors
    /// See [`BusConfig::load`].
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&ConfigPaths::main_config()?)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the TOML is invalid or holds out-of-range values.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: BusConfig =
            toml::from_str(content).map_err(|e| ConfigError::toml_parse(e, None))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.introspect_attempts == 0 {
            return Err(ConfigError::InvalidField {
                field: String::from("introspect_attempts"),
                reason: String::from("must be at least 1"),
            });
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::InvalidField {
                field: String::from("call_timeout_ms"),
                reason: String::from("must be greater than 0"),
            });
        }
        Ok(())
    }

    /// Introspection retry policy.
    pub fn introspect_policy(&self) -> IntrospectPolicy {
        IntrospectPolicy {
            attempts: self.introspect_attempts,
            delay: Duration::from_millis(self.introspect_delay_ms),
        }
    }

    /// Reply timeout for method calls.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = BusConfig::from_toml("").unwrap();
        assert_eq!(config, BusConfig::default());
        assert_eq!(config.introspect_policy(), IntrospectPolicy::default());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = BusConfig::from_toml(
            r#"
            bus = "session"
            introspect_delay_ms = 250
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(config.introspect_attempts, 3);
        assert_eq!(config.introspect_policy().delay, Duration::from_millis(250));
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = BusConfig::from_toml("introspect_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "introspect_attempts"));
    }

    #[test]
    fn unknown_bus_rejected() {
        let err = BusConfig::from_toml(r#"bus = "starship""#).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse { ref location, .. } if location == "string"));
    }

    #[test]
    fn serializes_back_to_toml() {
        let text = toml::to_string(&BusConfig::default()).unwrap();
        assert!(text.contains(r#"bus = "system""#));
        assert!(text.contains("introspect_attempts = 3"));
    }

    #[test]
    fn schema_lists_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(BusConfig)).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("introspect_attempts"));
        assert!(properties.contains_key("bus"));
    }
}
