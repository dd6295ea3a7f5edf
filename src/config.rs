//! TOML configuration for the relay daemon
//!
//! Credentials never live in the file; the `[connection]` section names
//! environment variables and they are resolved at connect time.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub store: StoreSection,
    pub connection: ConnectionSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
}

/// `[store]` - persistence bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    /// Store name, one sled tree per name
    #[serde(default = "default_store_name")]
    pub name: String,
    /// Maximum number of records before eviction kicks in
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Confirmed/dropped records older than this are purged
    #[serde(default = "default_purge_age_secs")]
    pub purge_age_secs: u64,
    /// Interval between housekeeping passes
    #[serde(default = "default_housekeeper_interval_secs")]
    pub housekeeper_interval_secs: u64,
    /// Filesystem path of the sled database
    pub path: String,
}

/// `[connection]` - broker endpoint and reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    /// Broker URL with protocol and port (mqtt:// or mqtts://)
    pub broker_url: String,
    /// Client identifier presented to the broker
    pub client_id: String,
    /// Environment variable containing the username
    pub username_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    /// Attempt to connect as soon as the daemon starts
    #[serde(default = "default_true")]
    pub auto_connect_on_startup: bool,
    /// Seconds between reconnect attempts
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Consecutive retryable failures before the watchdog is involved
    #[serde(default = "default_recovery_max_failures")]
    pub recovery_max_failures: u32,
    /// Request a fresh broker session instead of resuming one
    #[serde(default)]
    pub clean_start: bool,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

/// `[publish]` - publish-path limits and the new-session policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    /// Maximum accepted payload size in bytes
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    /// Maximum number of simultaneously in-flight messages
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Requeue in-flight messages on a new session instead of dropping them
    #[serde(default = "default_true")]
    pub republish_on_new_session: bool,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            max_payload_size: default_max_payload_size(),
            max_in_flight: default_max_in_flight(),
            republish_on_new_session: true,
        }
    }
}

/// `[schedule]` - cron-driven connection windows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSection {
    /// Enable the schedule strategy; without it the connection stays up
    #[serde(default)]
    pub enabled: bool,
    /// Quartz cron expression opening a connection window
    pub expression: Option<String>,
    /// Seconds of inactivity before a scheduled disconnect
    #[serde(default = "default_inactivity_interval_secs")]
    pub inactivity_interval_secs: u64,
    /// Grace period granted to the transport on scheduled disconnects
    #[serde(default = "default_disconnect_quiesce_secs")]
    pub disconnect_quiesce_secs: u64,
    /// Let high-urgency publishes open a connection outside the window
    #[serde(default)]
    pub priority_override_enable: bool,
    /// Priority at or below which the override applies
    #[serde(default)]
    pub priority_override_threshold: i32,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            enabled: false,
            expression: None,
            inactivity_interval_secs: default_inactivity_interval_secs(),
            disconnect_quiesce_secs: default_disconnect_quiesce_secs(),
            priority_override_enable: false,
            priority_override_threshold: 0,
        }
    }
}

fn default_store_name() -> String {
    "messages".to_string()
}

fn default_capacity() -> usize {
    10_000
}

fn default_purge_age_secs() -> u64 {
    3600 // one hour
}

fn default_housekeeper_interval_secs() -> u64 {
    900 // 15 minutes
}

fn default_true() -> bool {
    true
}

fn default_retry_interval_secs() -> u64 {
    60
}

fn default_recovery_max_failures() -> u32 {
    10
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_max_payload_size() -> usize {
    1_048_576 // 1 MiB
}

fn default_max_in_flight() -> usize {
    9
}

fn default_inactivity_interval_secs() -> u64 {
    60
}

fn default_disconnect_quiesce_secs() -> u64 {
    10
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation beyond what serde can express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "store.capacity must be greater than zero".to_string(),
            ));
        }
        if self.connection.retry_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connection.retry_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.connection.client_id.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "connection.client_id must not be empty".to_string(),
            ));
        }
        if self.publish.max_in_flight == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.max_in_flight must be greater than zero".to_string(),
            ));
        }
        if !self.connection.auto_connect_on_startup && !self.schedule.enabled {
            return Err(ConfigError::InvalidConfig(
                "connection.auto_connect_on_startup = false requires an enabled schedule"
                    .to_string(),
            ));
        }
        if self.schedule.enabled {
            let Some(expression) = &self.schedule.expression else {
                return Err(ConfigError::InvalidConfig(
                    "schedule.enabled requires schedule.expression".to_string(),
                ));
            };
            crate::schedule::parse_expression(expression).map_err(|e| {
                ConfigError::InvalidConfig(format!("schedule.expression: {e}"))
            })?;
        }
        if self.schedule.priority_override_enable && !self.schedule.enabled {
            return Err(ConfigError::InvalidConfig(
                "schedule.priority_override_enable requires schedule.enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn purge_age(&self) -> Duration {
        Duration::from_secs(self.store.purge_age_secs)
    }

    pub fn housekeeper_interval(&self) -> Duration {
        Duration::from_secs(self.store.housekeeper_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.connection.retry_interval_secs)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[store]
path = "/tmp/edgerelay-test"

[connection]
broker_url = "mqtt://localhost:1883"
client_id = "edgerelay-test"
"#;
        toml::from_str(toml_content).expect("test config should parse")
    }
}
