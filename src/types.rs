//! Core event types for the a3s-pubsub system
//!
//! All types use camelCase JSON serialization for wire compatibility.

use crate::error::{PubSubError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum key length in characters, measured after trimming whitespace
pub const MAX_KEY_LEN: usize = 100;

/// A single published event
///
/// Immutable once validated. Events sharing a `key` belong to the same topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier (evt-<uuid>)
    pub id: String,

    /// Topic the event was published to
    pub key: String,

    /// Opaque payload
    pub data: String,

    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event with auto-generated id and timestamp
    ///
    /// The event is not validated; call [`Event::validate`] before storing it.
    pub fn new(key: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            key: key.into(),
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create and validate an event in one step
    pub fn validated(key: impl Into<String>, data: impl Into<String>) -> Result<Self> {
        let event = Self::new(key, data);
        event.validate()?;
        Ok(event)
    }

    /// Check key and payload constraints
    pub fn validate(&self) -> Result<()> {
        validate_key(&self.key)?;
        validate_not_empty("data", &self.data)
    }

    /// Creation time in Unix milliseconds
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Validate a topic key: non-empty and at most [`MAX_KEY_LEN`] characters after trimming
pub fn validate_key(key: &str) -> Result<()> {
    validate_not_empty("key", key)?;
    let len = key.trim().chars().count();
    if len > MAX_KEY_LEN {
        return Err(PubSubError::validation(
            "key",
            format!("length {} exceeds {} characters", len, MAX_KEY_LEN),
        ));
    }
    Ok(())
}

/// Reject empty or whitespace-only values
pub fn validate_not_empty(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PubSubError::validation(field, "must not be empty"));
    }
    Ok(())
}
