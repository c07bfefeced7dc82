//! Broker core: topic registry, fan-out dispatch, coordinated shutdown
//!
//! Every subscription owns one dispatch worker fed by a bounded mailbox.
//! `publish` snapshots the subscriber list under a read lock, releases it,
//! then `try_send`s into each mailbox, so the publisher never waits on a
//! handler and a slow handler only backs up its own mailbox.

pub mod subscription;

pub use subscription::Subscription;

use crate::error::{PubSubError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use subscription::Unregister;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Broker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Accepting subscribe and publish
    Open,
    /// `close` in progress; subscriptions cancelled, waiting on in-flight dispatches
    Closing,
    /// Fully closed
    Closed,
}

/// Broker limits
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Hard cap on live subscriptions per topic
    pub max_subscribers_per_topic: usize,

    /// Pending dispatches buffered per subscription before new messages are dropped
    pub mailbox_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_subscribers_per_topic: 1000,
            mailbox_capacity: 1024,
        }
    }
}

/// Broker status snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerInfo {
    /// Topics with at least one registered subscription
    pub topics: usize,
    /// Live subscriptions across all topics
    pub subscriptions: usize,
    /// Accepted publish calls
    pub published: u64,
    /// Messages handed to subscriber mailboxes
    pub delivered: u64,
    /// Messages dropped because a mailbox was full
    pub dropped: u64,
}

struct Subscriber<T> {
    id: u64,
    token: CancellationToken,
    mailbox: mpsc::Sender<T>,
}

impl<T> Subscriber<T> {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.mailbox.is_closed()
    }
}

struct Registry<T> {
    state: BrokerState,
    topics: HashMap<String, Vec<Arc<Subscriber<T>>>>,
}

struct Inner<T> {
    config: BrokerConfig,
    registry: RwLock<Registry<T>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    workers: TaskTracker,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl<T> Inner<T> {
    // Registry mutations are single statements, a poisoned lock still holds a consistent map
    fn read(&self) -> RwLockReadGuard<'_, Registry<T>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry<T>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + 'static> Unregister for Inner<T> {
    fn unregister(&self, topic: &str, id: u64) {
        let mut registry = self.write();
        if let Some(subscribers) = registry.topics.get_mut(topic) {
            subscribers.retain(|s| s.id != id);
            if subscribers.is_empty() {
                registry.topics.remove(topic);
            }
        }
    }
}

/// In-process publish/subscribe broker, typed by message payload
///
/// Cloning is cheap; clones share the same registry.
pub struct Broker<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Broker<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl<T> Broker<T>
where
    T: Clone + Send + 'static,
{
    /// Create an open broker
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: RwLock::new(Registry {
                    state: BrokerState::Open,
                    topics: HashMap::new(),
                }),
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
                workers: TaskTracker::new(),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register `handler` for every future publish on `topic`
    ///
    /// The handler runs on the subscription's own task, never on the
    /// publisher's, and sees messages in publish order. Must be called from
    /// within a Tokio runtime.
    pub fn subscribe<F, Fut>(&self, topic: impl Into<String>, handler: F) -> Result<Subscription>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let topic = topic.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.shutdown.child_token();
        let (mailbox, rx) = mpsc::channel(self.inner.config.mailbox_capacity);

        {
            let mut registry = self.inner.write();
            if registry.state != BrokerState::Open {
                return Err(PubSubError::closed("broker"));
            }

            let limit = self.inner.config.max_subscribers_per_topic;
            let subscribers = registry.topics.entry(topic.clone()).or_default();
            subscribers.retain(|s| s.is_live());
            if subscribers.len() >= limit {
                tracing::warn!(topic = %topic, limit, "Subscriber limit reached");
                return Err(PubSubError::SubscriberLimit { topic, limit });
            }
            subscribers.push(Arc::new(Subscriber {
                id,
                token: token.clone(),
                mailbox,
            }));
        }

        self.inner
            .workers
            .spawn(dispatch_loop(rx, token.clone(), handler));

        tracing::debug!(topic = %topic, subscription_id = id, "Subscribed");

        let registry: Weak<dyn Unregister> = Arc::downgrade(&self.inner) as Weak<dyn Unregister>;
        Ok(Subscription::new(id, topic, token, registry))
    }

    /// Dispatch `msg` to every subscription currently registered on `topic`
    ///
    /// Never waits on a handler. A subscription whose mailbox is full misses
    /// this message; the drop is logged and counted.
    pub fn publish(&self, topic: &str, msg: T) -> Result<()> {
        let targets: Vec<Arc<Subscriber<T>>> = {
            let registry = self.inner.read();
            if registry.state != BrokerState::Open {
                return Err(PubSubError::closed("broker"));
            }
            registry
                .topics
                .get(topic)
                .map(|subs| {
                    subs.iter()
                        .filter(|s| !s.token.is_cancelled())
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        self.inner.published.fetch_add(1, Ordering::Relaxed);

        for target in targets {
            match target.mailbox.try_send(msg.clone()) {
                Ok(()) => {
                    self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        topic = %topic,
                        subscription_id = target.id,
                        "Subscriber mailbox full, message dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    // Worker gone; the record is removed on the next prune
                    tracing::debug!(
                        topic = %topic,
                        subscription_id = target.id,
                        "Subscriber worker stopped, skipping"
                    );
                }
            }
        }

        Ok(())
    }

    /// Cancel every subscription and wait for in-flight dispatches
    ///
    /// Returns `DeadlineExceeded` if handlers are still running after
    /// `timeout`. A second call returns `Ok(())` without doing anything.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        let cancelled = {
            let mut registry = self.inner.write();
            if registry.state != BrokerState::Open {
                return Ok(());
            }
            registry.state = BrokerState::Closing;
            let count: usize = registry.topics.values().map(Vec::len).sum();
            registry.topics.clear();
            count
        };

        // Every subscription token is a child of this one
        self.inner.shutdown.cancel();
        self.inner.workers.close();

        tracing::info!(subscriptions = cancelled, "Broker closing");

        let drained = tokio::time::timeout(timeout, self.inner.workers.wait()).await;
        self.inner.write().state = BrokerState::Closed;

        match drained {
            Ok(()) => {
                tracing::info!("Broker closed");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    pending = self.inner.workers.len(),
                    "Broker close deadline exceeded"
                );
                Err(PubSubError::DeadlineExceeded { timeout })
            }
        }
    }

    /// Remove cancelled subscriptions and those whose worker has exited
    ///
    /// Returns the number of records removed.
    pub fn prune(&self) -> usize {
        let mut registry = self.inner.write();
        let mut removed = 0;
        registry.topics.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| s.is_live());
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });
        removed
    }

    /// Run [`prune`](Self::prune) every `interval` until the broker closes
    pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        let broker = self.clone();
        self.inner.workers.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = broker.inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = broker.prune();
                        if removed > 0 {
                            tracing::debug!(removed, "Pruned inactive subscriptions");
                        }
                    }
                }
            }
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> BrokerState {
        self.inner.read().state
    }

    /// Live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .read()
            .topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| s.is_live()).count())
            .unwrap_or(0)
    }

    /// Counters and registry size
    pub fn info(&self) -> BrokerInfo {
        let registry = self.inner.read();
        BrokerInfo {
            topics: registry.topics.len(),
            subscriptions: registry
                .topics
                .values()
                .map(|subs| subs.iter().filter(|s| s.is_live()).count())
                .sum(),
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn dispatch_loop<T, F, Fut>(mut mailbox: mpsc::Receiver<T>, token: CancellationToken, handler: F)
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            msg = mailbox.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        // Cancellation may land while the message waits in the mailbox
        if token.is_cancelled() {
            break;
        }
        handler(msg).await;
    }
}
