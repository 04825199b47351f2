//! Flow control: read-ahead up to the prefetch window for buffered queues,
//! one delivery at a time for inline ones.

use std::time::Duration;

use durable_bus::{BusRuntime, EnvelopeSender, SubscriberConfiguration, TransportOptions};

use crate::support::{envelope, transport, wait_until, Behavior, RecordingReceiver};

#[tokio::test]
async fn durable_listener_fills_its_prefetch_window() {
    let (broker, transport) = transport(TransportOptions::default());
    transport
        .configure_queue("orders", SubscriberConfiguration::new().durable())
        .unwrap();
    let queue = transport.queue("orders");
    queue.setup().await.unwrap();
    for n in 0..10 {
        transport.send(envelope(n)).await.unwrap();
    }
    let runtime = BusRuntime::new(4);
    assert_eq!(queue.resolved_prefetch_count(runtime.max_parallelism()), 8);
    let receiver = RecordingReceiver::with_delay(Behavior::Accept, Duration::from_millis(300));

    let listener = queue.build_listener(&runtime, receiver.clone()).await.unwrap();
    wait_until(|| broker.unacked_count() == 8).await;
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(broker.unacked_count() <= 8);
        assert_eq!(broker.ready_count("orders"), 2);
    }
    // Handling stays sequential while the buffer fills.
    assert_eq!(receiver.started(), 1);

    let stats = listener.stop().await;

    assert_eq!(broker.unacked_count(), 0);
    assert_eq!(broker.ready_count("orders"), 10 - stats.handled);
    let next = &broker.ready("orders")[0];
    assert_eq!(next.message["n"], stats.handled as u64);
}

#[tokio::test]
async fn inline_listener_holds_one_delivery() {
    let (broker, transport) = transport(TransportOptions::default());
    transport
        .configure_queue("orders", SubscriberConfiguration::new().send_inline())
        .unwrap();
    let queue = transport.queue("orders");
    queue.setup().await.unwrap();
    for n in 0..5 {
        transport.send(envelope(n)).await.unwrap();
    }
    let receiver = RecordingReceiver::with_delay(Behavior::Accept, Duration::from_millis(200));

    let listener = queue
        .build_listener(&BusRuntime::new(4), receiver.clone())
        .await
        .unwrap();
    wait_until(|| receiver.started() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(broker.unacked_count(), 1);
    assert_eq!(broker.ready_count("orders"), 4);

    listener.stop().await;
}

#[tokio::test]
async fn buffered_deliveries_are_handled_in_order() {
    let (_broker, transport) = transport(TransportOptions::default());
    let queue = transport.queue("orders");
    queue.setup().await.unwrap();
    for n in 0..6 {
        transport.send(envelope(n)).await.unwrap();
    }
    let receiver = RecordingReceiver::with_delay(Behavior::Accept, Duration::from_millis(5));

    let listener = queue
        .build_listener(&BusRuntime::new(2), receiver.clone())
        .await
        .unwrap();
    wait_until(|| receiver.count() == 6).await;
    listener.stop().await;

    let numbers: Vec<u64> = receiver
        .received()
        .iter()
        .map(|e| e.message["n"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, [0, 1, 2, 3, 4, 5]);
}
