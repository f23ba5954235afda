//! Configuration system for the Creditline CLI.

use creditline_core::EndpointConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server endpoint configuration
    #[serde(default = "default_endpoint")]
    pub endpoint: EndpointConfig,
    /// Scenario parameters
    #[serde(default)]
    pub scenario: ScenarioConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scenario parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Requests sent by the round-trip client
    #[serde(default = "default_requests")]
    pub requests: usize,
    /// Request body used by the round-trip client
    #[serde(default = "default_body")]
    pub body: String,
    /// Replies the server sends to the vanishing client
    #[serde(default = "default_replies")]
    pub replies: usize,
    /// Replies the vanishing client takes before it disappears
    #[serde(default = "default_taken")]
    pub taken: usize,
    /// Fresh clients served after the vanishing one
    #[serde(default = "default_clients")]
    pub clients: usize,
    /// Outgoing deliveries the server leaves unsettled
    #[serde(default = "default_keep_unsettled")]
    pub keep_unsettled: usize,
    /// Delay between polls of an endpoint
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Time a client waits for a reply
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_endpoint() -> EndpointConfig {
    EndpointConfig::named("server")
        .with_outgoing_window(10)
        .with_incoming_window(10)
}

fn default_requests() -> usize {
    1
}

fn default_body() -> String {
    "hello world".to_string()
}

fn default_replies() -> usize {
    10
}

fn default_taken() -> usize {
    3
}

fn default_clients() -> usize {
    5
}

fn default_keep_unsettled() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_reply_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            scenario: ScenarioConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            body: default_body(),
            replies: default_replies(),
            taken: default_taken(),
            clients: default_clients(),
            keep_unsettled: default_keep_unsettled(),
            poll_interval_ms: default_poll_interval_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ScenarioConfig {
    /// Delay between polls
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reply timeout
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `path` if given and present, defaults otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.endpoint.validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.scenario.taken > self.scenario.replies {
            anyhow::bail!(
                "Vanishing client cannot take {} of {} replies",
                self.scenario.taken,
                self.scenario.replies
            );
        }

        if self.scenario.poll_interval_ms == 0 || self.scenario.reply_timeout_ms == 0 {
            anyhow::bail!("Poll interval and reply timeout must be greater than zero");
        }

        Ok(())
    }
}
