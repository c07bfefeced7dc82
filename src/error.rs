//! Error types for a3s-pubsub

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the publish/subscribe system
#[derive(Debug, Error)]
pub enum PubSubError {
    /// Input rejected before any state was touched
    #[error("Invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },

    /// Operation attempted after the component was closed
    #[error("{component} is closed")]
    Closed { component: &'static str },

    /// No stored events for the requested key
    #[error("No events found for key '{0}'")]
    NotFound(String),

    /// Sending to a remote subscriber failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Graceful shutdown did not finish in time
    #[error("Shutdown did not complete within {timeout:?}")]
    DeadlineExceeded { timeout: Duration },

    /// Topic already holds the maximum number of subscribers
    #[error("Topic '{topic}' reached the subscriber limit of {limit}")]
    SubscriberLimit { topic: String, limit: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl PubSubError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn closed(component: &'static str) -> Self {
        Self::Closed { component }
    }

    /// True for errors caused by bad caller input
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// True for errors caused by using a closed broker or store
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Result type alias for pub/sub operations
pub type Result<T> = std::result::Result<T, PubSubError>;

impl From<PubSubError> for tonic::Status {
    fn from(err: PubSubError) -> Self {
        match &err {
            PubSubError::Validation { .. } => tonic::Status::invalid_argument(err.to_string()),
            PubSubError::NotFound(_) => tonic::Status::not_found(err.to_string()),
            // Internal detail stays in the server log
            _ => tonic::Status::internal("internal server error"),
        }
    }
}
