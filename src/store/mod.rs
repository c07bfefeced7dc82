//! Event persistence contract
//!
//! Stores keep an append-only log per key. Successful appends are announced
//! through [`AppendHook`]s, invoked synchronously under the store's lock, so a
//! hook must not block. [`Broker<Event>`](crate::Broker) is the hook used in
//! production: every stored event is fanned out through the one broker.

use crate::broker::Broker;
use crate::error::Result;
use crate::types::Event;
use async_trait::async_trait;

pub mod memory;

pub use memory::MemoryEventStore;

/// Append-only event log keyed by topic
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Validate and append `event` to its key's log
    ///
    /// Hooks run once per successful append, before this returns.
    async fn append(&self, event: Event) -> Result<()>;

    /// Events stored under `key`, oldest first
    ///
    /// Returns `NotFound` when nothing was stored for `key`.
    async fn list_by_key(&self, key: &str) -> Result<Vec<Event>>;

    /// Reject further appends. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Store name (e.g., "memory")
    fn name(&self) -> &str;
}

/// Synchronous notification for each successful append
pub trait AppendHook: Send + Sync {
    /// Called under the store's lock; must return quickly
    ///
    /// An error does not undo the append; the store reports it to the caller.
    fn on_append(&self, event: &Event) -> Result<()>;
}

impl AppendHook for Broker<Event> {
    fn on_append(&self, event: &Event) -> Result<()> {
        // publish only snapshots and try_sends, safe under the store lock
        self.publish(&event.key, event.clone()).map_err(|e| {
            tracing::warn!(
                key = %event.key,
                event_id = %event.id,
                error = %e,
                "Failed to fan out stored event"
            );
            e
        })
    }
}
