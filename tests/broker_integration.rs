//! Broker and event bus integration tests
//!
//! End-to-end tests exercising publish/subscribe through the public API:
//! ordering, topic isolation, cancellation, slow-consumer isolation,
//! delivery streams, history, and shutdown.

use a3s_pubsub::{
    delivery_queue, Broker, BrokerConfig, BrokerState, Enqueued, Event, EventBus, PubSubError,
    StreamState,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn test_bus() -> EventBus {
    EventBus::in_memory(Broker::default(), 100)
}

fn collector() -> (
    impl Fn(Event) -> futures::future::Ready<()> + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Event>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |event: Event| {
        let _ = tx.send(event);
        futures::future::ready(())
    };
    (handler, rx)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

// ─── Publish & Subscribe ─────────────────────────────────────────

#[tokio::test]
async fn test_orders_arrive_in_publish_order() {
    let bus = test_bus();
    let (handler, mut rx) = collector();
    let _sub = bus.subscribe("orders", handler).unwrap();

    bus.publish("orders", "A").await.unwrap();
    bus.publish("orders", "B").await.unwrap();

    assert_eq!(recv(&mut rx).await.data, "A");
    assert_eq!(recv(&mut rx).await.data, "B");
}

#[tokio::test]
async fn test_subscriber_receives_exact_payload() {
    let bus = test_bus();
    let (handler, mut rx) = collector();
    let _sub = bus.subscribe("market.forex", handler).unwrap();

    let payloads = vec![
        "7.35".to_string(),
        "{\"rate\":7.3521}".to_string(),
        "ünïcødé".to_string(),
        "x".repeat(4096),
    ];
    for payload in &payloads {
        bus.publish("market.forex", payload).await.unwrap();
    }
    for payload in &payloads {
        let event = recv(&mut rx).await;
        assert_eq!(&event.data, payload);
        assert_eq!(event.key, "market.forex");
    }
}

#[tokio::test]
async fn test_topics_are_isolated() {
    let bus = test_bus();
    let (handler_a, mut rx_a) = collector();
    let (handler_b, mut rx_b) = collector();
    let _a = bus.subscribe("a", handler_a).unwrap();
    let _b = bus.subscribe("b", handler_b).unwrap();

    bus.publish("b", "for-b").await.unwrap();

    assert_eq!(recv(&mut rx_b).await.data, "for-b");
    assert!(timeout(Duration::from_millis(50), rx_a.recv()).await.is_err());
}

#[tokio::test]
async fn test_empty_key_rejected_and_nothing_stored_or_dispatched() {
    let bus = test_bus();
    let (handler, mut rx) = collector();
    let _sub = bus.subscribe("orders", handler).unwrap();

    let err = bus.publish("", "A").await.unwrap_err();
    assert!(err.is_validation());
    let err = bus.publish("   ", "A").await.unwrap_err();
    assert!(err.is_validation());

    assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    assert_eq!(bus.broker().info().published, 0);
    assert!(matches!(
        bus.history("orders").await,
        Err(PubSubError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_over_long_key_rejected() {
    let bus = test_bus();
    let err = bus.publish(&"k".repeat(101), "A").await.unwrap_err();
    assert!(err.is_validation());
    assert!(bus.publish(&"k".repeat(100), "A").await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_concurrent_subscribers_each_receive_once() {
    let bus = test_bus();
    let mut receivers = Vec::new();
    let mut subs = Vec::new();
    for _ in 0..3 {
        let (handler, rx) = collector();
        subs.push(bus.subscribe("orders", handler).unwrap());
        receivers.push(rx);
    }

    for i in 0..20 {
        bus.publish("orders", &i.to_string()).await.unwrap();
    }

    for rx in receivers.iter_mut() {
        for i in 0..20 {
            assert_eq!(recv(rx).await.data, i.to_string());
        }
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }
}

// ─── Cancellation ────────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_then_publish_never_dispatches() {
    let bus = test_bus();
    let calls = Arc::new(AtomicUsize::new(0));
    let sub = {
        let calls = calls.clone();
        bus.subscribe("orders", move |_event| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {}
        })
        .unwrap()
    };

    sub.cancel();
    sub.cancel();
    for _ in 0..10 {
        bus.publish("orders", "A").await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(bus.broker().subscriber_count("orders"), 0);
}

#[tokio::test]
async fn test_cancel_racing_publish_dispatches_at_most_once() {
    let broker: Broker<u32> = Broker::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let sub = {
        let calls = calls.clone();
        broker
            .subscribe("t", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .unwrap()
    };

    broker.publish("t", 1).unwrap();
    sub.cancel();
    for i in 2..10 {
        broker.publish("t", i).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(calls.load(Ordering::SeqCst) <= 1);
}

// ─── Backpressure Isolation ──────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_subscriber_does_not_delay_fast_one() {
    let broker: Broker<Instant> = Broker::default();
    let _slow = broker
        .subscribe("t", |_| tokio::time::sleep(Duration::from_millis(500)))
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _fast = broker
        .subscribe("t", move |sent: Instant| {
            let _ = tx.send(sent.elapsed());
            async {}
        })
        .unwrap();

    for _ in 0..5 {
        let start = Instant::now();
        broker.publish("t", Instant::now()).unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));

        let latency = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(latency < Duration::from_millis(100), "latency {:?}", latency);
    }
}

#[tokio::test]
async fn test_full_queue_drops_newest_without_blocking() {
    let (tx, mut rx) = delivery_queue(3);
    let start = Instant::now();
    let outcomes: Vec<Enqueued> = (0..10).map(|i| tx.enqueue(i)).collect();
    assert!(start.elapsed() < Duration::from_millis(50));

    assert_eq!(&outcomes[..3], &[Enqueued::Accepted; 3]);
    assert!(outcomes[3..].iter().all(|o| *o == Enqueued::Dropped));
    assert_eq!(tx.dropped(), 7);

    drop(tx);
    let kept: Vec<i32> = rx.by_ref().collect().await;
    assert_eq!(kept, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_subscriber_limit_is_enforced() {
    let broker: Broker<u32> = Broker::new(BrokerConfig {
        max_subscribers_per_topic: 2,
        ..Default::default()
    });
    let first = broker.subscribe("t", |_| async {}).unwrap();
    let _second = broker.subscribe("t", |_| async {}).unwrap();

    let err = broker.subscribe("t", |_| async {}).unwrap_err();
    assert!(matches!(err, PubSubError::SubscriberLimit { limit: 2, .. }));

    // Other topics are unaffected, and a cancelled slot is reusable
    assert!(broker.subscribe("u", |_| async {}).is_ok());
    first.cancel();
    assert!(broker.subscribe("t", |_| async {}).is_ok());
}

// ─── Delivery Streams ────────────────────────────────────────────

#[tokio::test]
async fn test_stream_and_local_subscriber_see_same_events() {
    let bus = test_bus();
    let mut stream = bus.open_stream("orders").unwrap();
    let (handler, mut rx) = collector();
    let _sub = bus.subscribe("orders", handler).unwrap();

    let published = bus.publish("orders", "A").await.unwrap();

    let streamed = timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(streamed, published);
    assert_eq!(recv(&mut rx).await, published);
    assert_eq!(stream.state(), StreamState::Streaming);
}

#[tokio::test]
async fn test_dropped_stream_deregisters() {
    let bus = test_bus();
    let streams: Vec<_> = (0..3).map(|_| bus.open_stream("orders").unwrap()).collect();
    assert_eq!(bus.broker().subscriber_count("orders"), 3);

    drop(streams);

    timeout(Duration::from_secs(1), async {
        while bus.broker().subscriber_count("orders") > 0 || bus.gateway().active_streams() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Publishing to a key with no subscribers still succeeds
    bus.publish("orders", "A").await.unwrap();
}

// ─── History ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_history_per_key() {
    let bus = test_bus();
    bus.publish("orders", "A").await.unwrap();
    bus.publish("users", "u1").await.unwrap();
    bus.publish("orders", "B").await.unwrap();

    let orders = bus.history("orders").await.unwrap();
    let data: Vec<_> = orders.iter().map(|e| e.data.as_str()).collect();
    assert_eq!(data, vec!["A", "B"]);
    assert!(orders[0].timestamp <= orders[1].timestamp);
    assert_ne!(orders[0].id, orders[1].id);

    assert_eq!(bus.history("users").await.unwrap().len(), 1);
    assert!(matches!(
        bus.history("nobody").await,
        Err(PubSubError::NotFound(_))
    ));
}

// ─── Shutdown ────────────────────────────────────────────────────

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let broker: Broker<u32> = Broker::default();
    let _sub = broker.subscribe("t", |_| async {}).unwrap();

    broker.close(Duration::from_secs(1)).await.unwrap();
    broker.close(Duration::from_secs(1)).await.unwrap();
    assert_eq!(broker.state(), BrokerState::Closed);

    assert!(broker.publish("t", 1).unwrap_err().is_closed());
    assert!(broker.subscribe("t", |_| async {}).unwrap_err().is_closed());
    assert_eq!(broker.info().subscriptions, 0);
}

#[tokio::test]
async fn test_close_deadline_exceeded_with_stuck_handler() {
    let broker: Broker<u32> = Broker::default();
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let _sub = broker
        .subscribe("t", move |_| {
            let _ = started_tx.send(());
            std::future::pending::<()>()
        })
        .unwrap();

    broker.publish("t", 1).unwrap();
    timeout(Duration::from_secs(1), started_rx.recv())
        .await
        .unwrap()
        .unwrap();

    let err = broker.close(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, PubSubError::DeadlineExceeded { .. }));
    assert_eq!(broker.state(), BrokerState::Closed);
}

#[tokio::test]
async fn test_bus_close_ends_open_streams() {
    let bus = test_bus();
    let mut streams: Vec<_> = (0..5).map(|_| bus.open_stream("orders").unwrap()).collect();

    bus.close(Duration::from_secs(1)).await.unwrap();

    for stream in streams.iter_mut() {
        let end = timeout(Duration::from_secs(1), stream.next()).await.unwrap();
        assert!(end.is_none());
        stream.terminated().await;
        assert_eq!(stream.state(), StreamState::Terminated);
    }
    assert_eq!(bus.gateway().active_streams(), 0);
    assert!(bus.publish("orders", "A").await.unwrap_err().is_closed());
}
