//! In-memory event store
//!
//! Keeps every event for the life of the process. No eviction, no durability.

use super::{AppendHook, EventStore};
use crate::error::{PubSubError, Result};
use crate::types::{validate_key, Event};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only per-key log held in memory
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<String, Vec<Event>>>,
    hooks: Vec<Arc<dyn AppendHook>>,
    closed: AtomicBool,
}

impl MemoryEventStore {
    /// Create an empty store without hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook fired after every successful append
    pub fn with_hook(mut self, hook: Arc<dyn AppendHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Number of distinct keys with at least one event
    pub async fn key_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Total events across all keys
    pub async fn len(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: Event) -> Result<()> {
        event.validate()?;

        // Checked under the lock so close() cannot interleave with a write
        let mut events = self.events.write().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(PubSubError::closed("store"));
        }

        let log = events.entry(event.key.clone()).or_default();
        log.push(event);
        let mut result = Ok(());
        if let Some(stored) = log.last() {
            for hook in &self.hooks {
                if let Err(e) = hook.on_append(stored) {
                    result = result.and(Err(e));
                }
            }
        }
        result
    }

    async fn list_by_key(&self, key: &str) -> Result<Vec<Event>> {
        validate_key(key)?;
        let events = self.events.read().await;
        match events.get(key) {
            Some(log) if !log.is_empty() => Ok(log.clone()),
            _ => Err(PubSubError::NotFound(key.to_string())),
        }
    }

    async fn close(&self) -> Result<()> {
        let events = self.events.write().await;
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(keys = events.len(), "Event store closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
