//! Publish/subscribe use cases on top of the broker and the event store
//!
//! `EventBus` validates input, appends to the store (whose broker hook fans
//! the event out), and hands out local subscriptions, remote delivery
//! streams and per-key history.

use crate::broker::{Broker, BrokerState, Subscription};
use crate::error::{PubSubError, Result};
use crate::gateway::{DeliveryStream, StreamGateway};
use crate::store::{EventStore, MemoryEventStore};
use crate::types::{validate_key, Event};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// High-level entry point used by the RPC layer
#[derive(Clone)]
pub struct EventBus {
    store: Arc<dyn EventStore>,
    broker: Broker<Event>,
    gateway: Arc<StreamGateway>,
}

impl EventBus {
    /// Wire a bus from parts
    ///
    /// `store` is expected to publish through `broker` on append (see
    /// [`AppendHook`](crate::store::AppendHook)); [`EventBus::in_memory`]
    /// does this wiring.
    pub fn new(
        store: Arc<dyn EventStore>,
        broker: Broker<Event>,
        gateway: Arc<StreamGateway>,
    ) -> Self {
        Self {
            store,
            broker,
            gateway,
        }
    }

    /// Memory store hooked to `broker`, with a gateway buffering
    /// `queue_capacity` events per stream
    pub fn in_memory(broker: Broker<Event>, queue_capacity: usize) -> Self {
        let store = MemoryEventStore::new().with_hook(Arc::new(broker.clone()));
        let gateway = StreamGateway::new(broker.clone(), queue_capacity);
        Self::new(Arc::new(store), broker, Arc::new(gateway))
    }

    /// Validate, store and fan out a new event
    ///
    /// Fails with `Closed` if the broker shuts down before fan-out, even when
    /// the store already kept the event.
    pub async fn publish(&self, key: &str, data: &str) -> Result<Event> {
        let event = Event::validated(key, data)?;
        if self.broker.state() != BrokerState::Open {
            return Err(PubSubError::closed("broker"));
        }

        self.store.append(event.clone()).await.map_err(|e| {
            tracing::error!(key = %key, error = %e, "Failed to publish event");
            e
        })?;

        tracing::info!(
            event_id = %event.id,
            key = %event.key,
            "Event published"
        );

        Ok(event)
    }

    /// Register an in-process handler for `key`
    pub fn subscribe<F, Fut>(&self, key: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        validate_key(key)?;
        self.broker.subscribe(key, handler)
    }

    /// Open a remote delivery stream for `key`
    pub fn open_stream(&self, key: &str) -> Result<DeliveryStream> {
        self.gateway.open(key)
    }

    /// Stored events for `key`, oldest first
    pub async fn history(&self, key: &str) -> Result<Vec<Event>> {
        validate_key(key)?;
        self.store.list_by_key(key).await
    }

    pub fn broker(&self) -> &Broker<Event> {
        &self.broker
    }

    pub fn gateway(&self) -> &StreamGateway {
        &self.gateway
    }

    /// Store backend name
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Close broker, then streams, then the store, all within `timeout`
    ///
    /// Every stage runs even if an earlier one misses the deadline; the first
    /// error is returned.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        let broker = self.broker.close(timeout).await;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let streams = self.gateway.close(remaining).await;
        if let Err(e) = &streams {
            tracing::warn!(
                active = self.gateway.active_streams(),
                error = %e,
                "Delivery streams still running at shutdown"
            );
        }
        let store = self.store.close().await;

        broker.and(streams).and(store)
    }
}
