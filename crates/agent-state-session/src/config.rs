//! Coordinator configuration parsing and validation.

use std::{env, fs, path::Path, time::Duration};

use agent_state_executor::DEFAULT_SYSTEM_MESSAGE;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable overriding `redis_url`.
pub const REDIS_URL_ENV: &str = "AGENT_STATE_REDIS_URL";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".into()
}

const fn default_session_ttl() -> u64 {
    300
}

const fn default_memory_ttl() -> u64 {
    30 * 24 * 3600
}

const fn default_lease_ttl() -> u64 {
    60
}

fn default_system_message() -> String {
    DEFAULT_SYSTEM_MESSAGE.into()
}

/// Coordinator configuration parsed from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CoordinatorConfig {
    /// Connection URL of the Redis store.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Sliding expiry window of session records, in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Retention of long-term memory, in seconds.
    #[serde(default = "default_memory_ttl")]
    pub memory_ttl_secs: u64,
    /// Lifetime of an execution lease, in seconds. The lease is renewed
    /// while a step runs; a `running` session whose lease lapsed is treated
    /// as orphaned. Must not exceed `session_ttl_secs`.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
    /// System message used when a request does not carry one.
    #[serde(default = "default_system_message")]
    pub system_message: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            session_ttl_secs: default_session_ttl(),
            memory_ttl_secs: default_memory_ttl(),
            lease_ttl_secs: default_lease_ttl(),
            system_message: default_system_message(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse and validate configuration from TOML text.
    ///
    /// # Errors
    /// Returns error if the TOML is invalid or a value is out of range.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file and apply environment overrides.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = env::var(REDIS_URL_ENV) {
            if !url.trim().is_empty() {
                self.redis_url = url;
            }
        }
    }

    /// Reject values the coordinator cannot work with.
    ///
    /// # Errors
    /// Returns error naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("session_ttl_secs", self.session_ttl_secs),
            ("memory_ttl_secs", self.memory_ttl_secs),
            ("lease_ttl_secs", self.lease_ttl_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.lease_ttl_secs > self.session_ttl_secs {
            return Err(ConfigError::Invalid(format!(
                "lease_ttl_secs ({}) must not exceed session_ttl_secs ({})",
                self.lease_ttl_secs, self.session_ttl_secs
            )));
        }
        if self.system_message.trim().is_empty() {
            return Err(ConfigError::Invalid("system_message must not be empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    #[must_use]
    pub const fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }

    #[must_use]
    pub const fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// How often a running step renews its lease and session record.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        (self.lease_ttl() / 3).max(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = CoordinatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
        assert_eq!(config.session_ttl(), Duration::from_secs(300));
        assert_eq!(config.memory_ttl(), Duration::from_secs(2_592_000));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
redis_url = "redis://cache:6380/2"
session_ttl_secs = 3600
lease_ttl_secs = 120
system_message = "Answer in French."
"#,
        )
        .unwrap();
        assert_eq!(config.redis_url, "redis://cache:6380/2");
        assert_eq!(config.session_ttl_secs, 3600);
        assert_eq!(config.lease_ttl(), Duration::from_secs(120));
        assert_eq!(config.system_message, "Answer in French.");
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let err = CoordinatorConfig::from_toml_str("session_ttl_secs = 0").unwrap_err();
        assert!(err.to_string().contains("session_ttl_secs"));
    }

    #[test]
    fn lease_outliving_the_session_is_rejected() {
        let err = CoordinatorConfig::from_toml_str(
            "session_ttl_secs = 300\nlease_ttl_secs = 900",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("lease_ttl_secs"));

        let equal = CoordinatorConfig::from_toml_str("session_ttl_secs = 60\nlease_ttl_secs = 60");
        assert!(equal.is_ok());
    }

    #[test]
    fn heartbeat_runs_several_times_per_lease() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(20));
        assert!(config.validate().is_ok());

        let tiny = CoordinatorConfig {
            session_ttl_secs: 2,
            lease_ttl_secs: 2,
            ..CoordinatorConfig::default()
        };
        assert_eq!(tiny.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(matches!(
            CoordinatorConfig::from_toml_str("session_ttl_secs = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
