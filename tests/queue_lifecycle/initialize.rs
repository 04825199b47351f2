//! Initialization under the transport's provisioning and purge policy.

use durable_bus::{Envelope, QueueState, SubscriberConfiguration, TransportOptions};
use serde_json::json;

use crate::support::{default_transport, transport};

fn envelope(n: u32) -> Envelope {
    Envelope::new("OrderPlaced", json!({ "n": n }))
}

#[tokio::test]
async fn initialize_without_policy_touches_nothing() {
    let (broker, transport) = default_transport();
    let queue = transport.queue("orders");

    queue.initialize().await.unwrap();

    assert_eq!(broker.calls().channels_opened, 0);
    assert_eq!(queue.state(), QueueState::Initialized);
    assert!(!queue.has_declared());
}

#[tokio::test]
async fn auto_provision_declares_once() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    let queue = transport.queue("orders");

    queue.initialize().await.unwrap();
    queue.initialize().await.unwrap();

    let calls = broker.calls();
    assert_eq!(calls.declare, 1);
    assert_eq!(calls.channels_opened, 1);
    assert_eq!(calls.channels_closed, 1);
    assert!(queue.has_declared());
}

#[tokio::test]
async fn system_queue_initializes_without_broker() {
    let (broker, transport) = transport(
        TransportOptions::default()
            .with_auto_provision(true)
            .with_auto_purge_all_queues(true),
    );

    transport.queue("wolverine.control").initialize().await.unwrap();

    assert_eq!(broker.calls().channels_opened, 0);
    assert_eq!(broker.calls().admin(), 0);
}

#[tokio::test]
async fn purge_on_startup_empties_queue() {
    let (broker, transport) = default_transport();
    transport
        .configure_queue("orders", SubscriberConfiguration::new().purge_on_startup())
        .unwrap();
    let queue = transport.queue("orders");
    queue.setup().await.unwrap();
    broker.push("orders", envelope(1)).unwrap();
    broker.push("orders", envelope(2)).unwrap();

    queue.initialize().await.unwrap();

    assert_eq!(broker.ready_count("orders"), 0);
    assert_eq!(broker.calls().purge, 1);
}

#[tokio::test]
async fn auto_purge_all_skips_ephemeral_queues() {
    let (broker, transport) = transport(
        TransportOptions::default()
            .with_auto_provision(true)
            .with_auto_purge_all_queues(true),
    );
    transport
        .configure_queue("scratch", SubscriberConfiguration::new().auto_delete())
        .unwrap();
    transport
        .configure_queue("private", SubscriberConfiguration::new().exclusive())
        .unwrap();
    transport.queue("orders");

    transport.initialize().await.unwrap();

    let calls = broker.calls();
    assert_eq!(calls.declare, 3);
    assert_eq!(calls.purge, 1);
    assert_eq!(
        broker.queue_names(),
        vec!["orders".to_string(), "private".to_string(), "scratch".to_string()]
    );
}

#[tokio::test]
async fn failed_provision_can_be_retried() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    broker.fail_next_opens(1);
    let queue = transport.queue("orders");

    assert!(queue.initialize().await.is_err());
    queue.initialize().await.unwrap();

    assert!(queue.has_declared());
    assert_eq!(queue.state(), QueueState::Declared);
}
