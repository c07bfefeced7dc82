//! Bounded delivery queue between broker dispatch and one remote consumer
//!
//! The sending half never blocks: when the queue is full the new item is
//! dropped and counted. The receiving half is a `Stream` that ends once
//! every sender is gone or the receiver is closed.

use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default per-subscriber capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Item accepted
    Accepted,
    /// Queue full, item dropped
    Dropped,
    /// Receiver gone, item discarded
    Closed,
}

#[derive(Debug, Default)]
struct QueueStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
}

/// Create a queue holding at most `capacity` pending items
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn delivery_queue<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let stats = Arc::new(QueueStats::default());
    (
        QueueSender {
            tx,
            stats: stats.clone(),
        },
        QueueReceiver { rx, stats },
    )
}

/// Producer half, cloneable
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    stats: Arc<QueueStats>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Push without waiting; drops `item` when the queue is full
    pub fn enqueue(&self, item: T) -> Enqueued {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Enqueued::Accepted
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueued::Dropped
            }
            Err(TrySendError::Closed(_)) => Enqueued::Closed,
        }
    }

    /// Items dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Whether the receiving half has been closed or dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
    stats: Arc<QueueStats>,
}

impl<T> QueueReceiver<T> {
    /// Wait for the next item; `None` once the queue is closed and empty
    pub async fn next_item(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Refuse further items; already buffered ones can still be drained
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Items accepted so far
    pub fn accepted(&self) -> u64 {
        self.stats.accepted.load(Ordering::Relaxed)
    }

    /// Items dropped so far
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Stream for QueueReceiver<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = delivery_queue(8);
        for i in 0..5 {
            assert_eq!(tx.enqueue(i), Enqueued::Accepted);
        }
        drop(tx);

        let items: Vec<i32> = rx.by_ref().collect().await;
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
        assert_eq!(rx.accepted(), 5);
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let (tx, mut rx) = delivery_queue(2);
        assert_eq!(tx.enqueue("a"), Enqueued::Accepted);
        assert_eq!(tx.enqueue("b"), Enqueued::Accepted);
        assert_eq!(tx.enqueue("c"), Enqueued::Dropped);
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.dropped(), 1);

        assert_eq!(rx.next_item().await, Some("a"));
        assert_eq!(rx.next_item().await, Some("b"));

        // Space freed, accepted again
        assert_eq!(tx.enqueue("d"), Enqueued::Accepted);
        assert_eq!(rx.next_item().await, Some("d"));
    }

    #[tokio::test]
    async fn test_enqueue_never_blocks() {
        let (tx, _rx) = delivery_queue(1);
        let start = std::time::Instant::now();
        for i in 0..10_000 {
            tx.enqueue(i);
        }
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(tx.dropped(), 9_999);
    }

    #[test]
    fn test_drain_pends_until_item_arrives() {
        let (tx, mut rx) = delivery_queue::<u8>(2);
        let mut next = tokio_test::task::spawn(rx.next_item());
        tokio_test::assert_pending!(next.poll());

        tx.enqueue(7);
        assert!(next.is_woken());
        assert_eq!(tokio_test::assert_ready!(next.poll()), Some(7));
    }

    #[tokio::test]
    async fn test_dropping_senders_releases_drain() {
        let (tx, mut rx) = delivery_queue::<u8>(4);
        let drain = tokio::spawn(async move { rx.next_item().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(tx);

        let result = tokio::time::timeout(Duration::from_secs(1), drain)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_close_rejects_new_items() {
        let (tx, mut rx) = delivery_queue(4);
        tx.enqueue(1);
        rx.close();

        assert!(tx.is_closed());
        assert_eq!(tx.enqueue(2), Enqueued::Closed);
        assert_eq!(rx.next_item().await, Some(1));
        assert_eq!(rx.next_item().await, None);
    }
}
