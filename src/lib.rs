//! # a3s-pubsub
//!
//! In-process publish/subscribe broker with streaming gRPC delivery for the
//! A3S ecosystem.
//!
//! ## Overview
//!
//! Producers publish events to a key; subscribers receive a live stream of
//! events for that key. Delivery is best-effort and at-most-once: a slow
//! subscriber loses events once its bounded queue is full, but never delays
//! the publisher or any other subscriber.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_pubsub::{Broker, EventBus};
//!
//! # async fn example() -> a3s_pubsub::Result<()> {
//! let bus = EventBus::in_memory(Broker::default(), 100);
//!
//! let _sub = bus.subscribe("orders", |event| async move {
//!     println!("{} -> {}", event.key, event.data);
//! })?;
//!
//! let event = bus.publish("orders", "A").await?;
//! println!("Published: {}", event.id);
//!
//! bus.close(std::time::Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Broker** - topic registry and fan-out; one dispatch worker per subscription
//! - **Subscription** - idempotent cancellation handle
//! - **delivery_queue** - bounded, drop-on-full buffer per remote subscriber
//! - **StreamGateway** - bridges a remote stream onto the broker
//! - **EventStore** - append-only log per key; appends fan out through the broker
//! - **EventBus** - validation and orchestration used by the gRPC service

pub mod broker;
pub mod bus;
pub mod config;
pub mod error;
pub mod gateway;
pub mod grpc;
pub mod logging;
pub mod queue;
pub mod store;
pub mod types;

// Re-export core types
pub use broker::{Broker, BrokerConfig, BrokerInfo, BrokerState, Subscription};
pub use bus::EventBus;
pub use config::Config;
pub use error::{PubSubError, Result};
pub use gateway::{DeliveryStream, StreamGateway, StreamState};
pub use queue::{delivery_queue, Enqueued, QueueReceiver, QueueSender};
pub use store::{AppendHook, EventStore, MemoryEventStore};
pub use types::Event;
