//! Streaming delivery gateway: one broker subscription per remote stream
//!
//! `open` registers a callback that enqueues into a bounded delivery queue,
//! then spawns a pump task that forwards queued events to the outbound
//! stream. The pump races the queue against cancellation (client gone,
//! subscription cancelled, gateway or broker shutdown) and always
//! deregisters its subscription on the way out.

use crate::broker::{Broker, Subscription};
use crate::error::{PubSubError, Result};
use crate::queue::{delivery_queue, Enqueued, QueueReceiver, DEFAULT_QUEUE_CAPACITY};
use crate::types::{validate_key, Event};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Per-stream lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Registering,
    Streaming,
    Terminated,
}

/// Why a stream stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    ClientGone,
    Cancelled,
    Shutdown,
    QueueClosed,
    SendFailed,
}

/// Bridges remote subscribe requests onto the broker
pub struct StreamGateway {
    broker: Broker<Event>,
    queue_capacity: usize,
    streams: TaskTracker,
    shutdown: CancellationToken,
}

impl StreamGateway {
    /// Create a gateway whose streams buffer up to `queue_capacity` events each
    pub fn new(broker: Broker<Event>, queue_capacity: usize) -> Self {
        Self {
            broker,
            queue_capacity: queue_capacity.max(1),
            streams: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a subscriber for `key` and return its event stream
    ///
    /// Fails with a validation error for an empty key, or with the broker's
    /// error (closed, subscriber limit) before any event flows.
    pub fn open(&self, key: &str) -> Result<DeliveryStream> {
        validate_key(key)?;
        if self.shutdown.is_cancelled() {
            return Err(PubSubError::closed("gateway"));
        }

        let (state_tx, state_rx) = watch::channel(StreamState::Registering);
        let (queue_tx, queue_rx) = delivery_queue(self.queue_capacity);

        let handler_key = key.to_string();
        let subscription = self
            .broker
            .subscribe(key, move |event: Event| {
                if queue_tx.enqueue(event) == Enqueued::Dropped {
                    tracing::warn!(
                        key = %handler_key,
                        dropped = queue_tx.dropped(),
                        "Subscriber queue full, event dropped"
                    );
                }
                futures::future::ready(())
            })
            .map_err(|e| {
                tracing::error!(key = %key, error = %e, "Failed to register subscriber");
                e
            })?;

        // Capacity 1: the delivery queue is the only real buffer
        let (out_tx, out_rx) = mpsc::channel(1);
        let pump = Pump {
            key: key.to_string(),
            queue: queue_rx,
            subscription,
            outbound: out_tx,
            shutdown: self.shutdown.clone(),
            state: state_tx,
        };
        self.streams.spawn(pump.run());

        Ok(DeliveryStream {
            key: key.to_string(),
            inner: ReceiverStream::new(out_rx),
            state: state_rx,
        })
    }

    /// Streams whose pump task is still running
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Stop every stream and wait up to `timeout` for their pumps to exit
    ///
    /// New `open` calls fail afterwards. Idempotent.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        self.shutdown.cancel();
        self.streams.close();
        tokio::time::timeout(timeout, self.streams.wait())
            .await
            .map_err(|_| PubSubError::DeadlineExceeded { timeout })
    }
}

impl Default for StreamGateway {
    fn default() -> Self {
        Self::new(Broker::default(), DEFAULT_QUEUE_CAPACITY)
    }
}

struct Pump {
    key: String,
    queue: QueueReceiver<Event>,
    subscription: Subscription,
    outbound: mpsc::Sender<Event>,
    shutdown: CancellationToken,
    state: watch::Sender<StreamState>,
}

impl Pump {
    async fn run(mut self) -> StreamEnd {
        self.state.send_replace(StreamState::Streaming);
        tracing::debug!(
            key = %self.key,
            subscription_id = self.subscription.id(),
            "Stream started"
        );

        let end = self.forward().await;

        self.subscription.cancel();
        self.queue.close();
        self.state.send_replace(StreamState::Terminated);

        tracing::debug!(
            key = %self.key,
            subscription_id = self.subscription.id(),
            reason = ?end,
            dropped = self.queue.dropped(),
            "Stream terminated"
        );
        end
    }

    async fn forward(&mut self) -> StreamEnd {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.subscription.cancelled() => return StreamEnd::Cancelled,
                _ = self.shutdown.cancelled() => return StreamEnd::Shutdown,
                _ = self.outbound.closed() => return StreamEnd::ClientGone,
                event = self.queue.next_item() => match event {
                    Some(event) => event,
                    None => return StreamEnd::QueueClosed,
                },
            };

            let event_id = event.id.clone();
            tokio::select! {
                biased;
                _ = self.subscription.cancelled() => return StreamEnd::Cancelled,
                _ = self.shutdown.cancelled() => return StreamEnd::Shutdown,
                sent = self.outbound.send(event) => {
                    if sent.is_err() {
                        let err = PubSubError::Transport("client stream closed".to_string());
                        tracing::warn!(
                            key = %self.key,
                            event_id = %event_id,
                            error = %err,
                            "Failed to deliver event"
                        );
                        return StreamEnd::SendFailed;
                    }
                }
            }
        }
    }
}

/// Events for one remote subscriber, in publish order
///
/// Dropping the stream ends the pump and deregisters the subscription.
pub struct DeliveryStream {
    key: String,
    inner: ReceiverStream<Event>,
    state: watch::Receiver<StreamState>,
}

impl DeliveryStream {
    /// Key this stream is subscribed to
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current pump state
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Wait until the pump has terminated
    pub async fn terminated(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == StreamState::Terminated)
            .await;
    }
}

impl Stream for DeliveryStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
