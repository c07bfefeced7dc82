//! Server configuration
//!
//! Loaded from TOML (or JSON by extension). Every field has a default, so a
//! partial file, or no file at all, yields a runnable config.

use crate::broker::BrokerConfig;
use crate::error::{PubSubError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub pubsub: PubSubConfig,
}

/// RPC listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on the whole shutdown sequence, in seconds (default: 30)
    #[serde(default = "default_graceful_shutdown_timeout_secs")]
    pub graceful_shutdown_timeout_secs: u64,

    /// HTTP/2 concurrent streams per connection (default: 100)
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: u32,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// trace, debug, info, warn or error (default: info)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// json or text (default: json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// stdout, stderr, or a file path (default: stdout)
    #[serde(default = "default_log_output")]
    pub output: String,

    /// Include source file and line (default: true)
    #[serde(default = "default_true")]
    pub enable_caller: bool,

    /// chrono format string for timestamps
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

/// Broker limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// Hard cap on live subscribers per key (default: 1000)
    #[serde(default = "default_max_subscribers_per_key")]
    pub max_subscribers_per_key: usize,

    /// Per-stream delivery queue capacity (default: 100)
    #[serde(default = "default_message_buffer_size")]
    pub message_buffer_size: usize,

    /// Per-subscription dispatch mailbox capacity for in-process handlers
    /// (default: 1024)
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Seconds between inactive-subscriber sweeps (default: 300)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_graceful_shutdown_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_streams() -> u32 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_log_output() -> String {
    "stdout".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timestamp_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

fn default_max_subscribers_per_key() -> usize {
    1000
}

fn default_message_buffer_size() -> usize {
    100
}

fn default_mailbox_capacity() -> usize {
    1024
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout_secs(),
            max_concurrent_streams: default_max_concurrent_streams(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: default_log_output(),
            enable_caller: default_true(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            max_subscribers_per_key: default_max_subscribers_per_key(),
            message_buffer_size: default_message_buffer_size(),
            mailbox_capacity: default_mailbox_capacity(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Config {
    /// Parse and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PubSubError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, falling back to defaults on any failure
    ///
    /// Runs before logging is set up, so failures go to stderr.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Failed to load config from {}, using defaults: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Apply one override, keeping the current value if the result is invalid
    pub fn apply_override(&mut self, change: impl FnOnce(&mut Config)) -> Result<()> {
        let mut candidate = self.clone();
        change(&mut candidate);
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.port == 0 {
            return Err(config_err("server port must be between 1 and 65535"));
        }
        if server.host.trim().is_empty() {
            return Err(config_err("server host is required"));
        }
        if server.graceful_shutdown_timeout_secs == 0 {
            return Err(config_err("graceful shutdown timeout must be positive"));
        }
        if server.max_concurrent_streams == 0 {
            return Err(config_err("max concurrent streams must be positive"));
        }

        let log = &self.log;
        if !LOG_LEVELS.contains(&log.level.to_ascii_lowercase().as_str()) {
            return Err(config_err(format!("invalid log level: {}", log.level)));
        }
        if !matches!(log.format.as_str(), "json" | "text") {
            return Err(config_err(format!("invalid log format: {}", log.format)));
        }
        if log.output.trim().is_empty() {
            return Err(config_err("log output is required"));
        }

        let pubsub = &self.pubsub;
        if pubsub.max_subscribers_per_key == 0 {
            return Err(config_err("max subscribers per key must be positive"));
        }
        if pubsub.message_buffer_size == 0 {
            return Err(config_err("message buffer size must be positive"));
        }
        if pubsub.mailbox_capacity == 0 {
            return Err(config_err("mailbox capacity must be positive"));
        }
        if pubsub.cleanup_interval_secs == 0 {
            return Err(config_err("cleanup interval must be positive"));
        }
        Ok(())
    }
}

impl ServerConfig {
    /// Returns the listener address string (e.g., "0.0.0.0:8080")
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout_secs)
    }
}

impl PubSubConfig {
    /// Broker settings derived from these limits
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_subscribers_per_topic: self.max_subscribers_per_key,
            mailbox_capacity: self.mailbox_capacity,
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn config_err(msg: impl Into<String>) -> PubSubError {
    PubSubError::Config(msg.into())
}
