//! Consumption: ack, requeue, reject and decode failures.

use std::time::Duration;

use durable_bus::{BusRuntime, EnvelopeSender, Envelope, SubscriberConfiguration, TransportOptions};
use serde_json::json;

use crate::support::{envelope, transport, wait_until, Behavior, RecordingReceiver};

#[tokio::test]
async fn handled_messages_are_acked_in_order() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    transport.queue("orders").setup().await.unwrap();
    for n in 0..3 {
        transport.send(envelope(n)).await.unwrap();
    }
    let receiver = RecordingReceiver::new(Behavior::Accept);

    let listener = transport
        .build_listener("orders", &BusRuntime::new(2), receiver.clone())
        .await
        .unwrap();
    wait_until(|| receiver.count() == 3).await;
    let stats = listener.stop().await;

    let numbers: Vec<u64> = receiver
        .received()
        .iter()
        .map(|e| e.message["n"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, [0, 1, 2]);
    assert_eq!(stats.received, 3);
    assert_eq!(stats.handled, 3);
    assert_eq!(broker.calls().ack, 3);
    assert_eq!(broker.ready_count("orders"), 0);
    assert_eq!(broker.unacked_count(), 0);
}

#[tokio::test]
async fn retry_requeues_and_redelivers() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    transport.queue("orders").setup().await.unwrap();
    transport.send(envelope(1)).await.unwrap();
    let receiver = RecordingReceiver::new(Behavior::RetryFirst);

    let listener = transport
        .build_listener("orders", &BusRuntime::new(1), receiver.clone())
        .await
        .unwrap();
    wait_until(|| receiver.count() == 2).await;
    let stats = listener.stop().await;

    let attempts: Vec<u32> = receiver.received().iter().map(|e| e.attempts).collect();
    assert_eq!(attempts, [1, 2]);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.handled, 1);
    assert_eq!(broker.calls().nack, 1);
    assert_eq!(broker.calls().ack, 1);
}

#[tokio::test]
async fn rejected_messages_are_dropped() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    transport.queue("orders").setup().await.unwrap();
    transport.send(envelope(1)).await.unwrap();
    let receiver = RecordingReceiver::new(Behavior::Reject);

    let listener = transport
        .build_listener("orders", &BusRuntime::new(1), receiver.clone())
        .await
        .unwrap();
    wait_until(|| receiver.count() == 1).await;
    let stats = listener.stop().await;

    assert_eq!(stats.rejected, 1);
    assert_eq!(broker.ready_count("orders"), 0);
    assert_eq!(broker.unacked_count(), 0);
}

#[tokio::test]
async fn unreadable_envelopes_never_reach_the_receiver() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    transport.queue("orders").setup().await.unwrap();
    let mut unreadable = Envelope::new("OrderPlaced", json!(null));
    unreadable.data = Some(b"\x00\x01".to_vec());
    unreadable.content_type = Some("application/x-unknown".into());
    broker.push("orders", unreadable).unwrap();
    transport.send(envelope(2)).await.unwrap();
    let receiver = RecordingReceiver::new(Behavior::Accept);

    let listener = transport
        .build_listener("orders", &BusRuntime::new(1), receiver.clone())
        .await
        .unwrap();
    wait_until(|| receiver.count() == 1).await;
    let stats = listener.stop().await;

    assert_eq!(stats.received, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(receiver.received()[0].message, json!({ "n": 2 }));
}

#[tokio::test]
async fn outgoing_rules_apply_before_publish() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    transport
        .configure_queue(
            "orders",
            SubscriberConfiguration::new().customize_outgoing(|e| e.set_header("tenant", "acme")),
        )
        .unwrap();
    transport.queue("orders").setup().await.unwrap();

    transport.send(envelope(1)).await.unwrap();

    let ready = broker.ready("orders");
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].header("tenant"), Some("acme"));
    assert_eq!(ready[0].content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn parallel_consumers_share_the_work() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    transport
        .configure_queue("orders", SubscriberConfiguration::new().listener_count(3))
        .unwrap();
    transport.queue("orders").setup().await.unwrap();
    for n in 0..6 {
        transport.send(envelope(n)).await.unwrap();
    }
    let receiver = RecordingReceiver::with_delay(Behavior::Accept, Duration::from_millis(20));

    let listener = transport
        .build_listener("orders", &BusRuntime::new(3), receiver.clone())
        .await
        .unwrap();
    wait_until(|| receiver.count() == 6).await;
    let stats = listener.stop().await;

    assert_eq!(stats.handled, 6);
    assert_eq!(broker.calls().ack, 6);
    assert_eq!(broker.ready_count("orders"), 0);
}
