//! Cancellable subscription handle

use std::fmt;
use std::sync::Weak;
use tokio_util::sync::CancellationToken;

/// Registry side of a subscription, reached through a weak reference
pub(crate) trait Unregister: Send + Sync {
    fn unregister(&self, topic: &str, id: u64);
}

/// Handle returned by [`Broker::subscribe`](crate::Broker::subscribe)
///
/// The broker owns the subscription record; the handle only carries the
/// cancellation trigger and the lookup key. Dropping the handle does not
/// cancel the subscription.
pub struct Subscription {
    id: u64,
    topic: String,
    token: CancellationToken,
    registry: Weak<dyn Unregister>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        topic: String,
        token: CancellationToken,
        registry: Weak<dyn Unregister>,
    ) -> Self {
        Self {
            id,
            topic,
            token,
            registry,
        }
    }

    /// Stop receiving messages and remove the record from the broker
    ///
    /// Idempotent. A dispatch already snapshotted by a concurrent publish
    /// may still run once.
    pub fn cancel(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.topic, self.id);
        }
        tracing::debug!(topic = %self.topic, subscription_id = self.id, "Subscription cancelled");
    }

    /// Whether the subscription was cancelled, directly or by broker close
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the subscription is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Broker-assigned identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Topic this subscription listens on
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
