//! Listener selection and prefetch resolution.

use durable_bus::{
    BusRuntime, ConfigurableEndpoint, EndpointMode, SubscriberConfiguration, TransportError,
    TransportOptions,
};

use crate::support::{transport, wait_until, Behavior, RecordingReceiver};

#[tokio::test]
async fn prefetch_follows_mode_and_parallelism() {
    let (_broker, transport) = transport(TransportOptions::default());
    transport
        .configure_queue("durable", SubscriberConfiguration::new().durable())
        .unwrap();
    transport
        .configure_queue("inline", SubscriberConfiguration::new().send_inline())
        .unwrap();
    transport
        .configure_queue(
            "explicit",
            SubscriberConfiguration::new().durable().prefetch_count(3),
        )
        .unwrap();

    let durable = transport.queue("durable");
    assert_eq!(durable.endpoint().mode(), EndpointMode::Durable);
    assert_eq!(durable.resolved_prefetch_count(4), 8);
    assert_eq!(transport.queue("inline").resolved_prefetch_count(4), 100);
    assert_eq!(transport.queue("explicit").resolved_prefetch_count(4), 3);
}

#[tokio::test]
async fn one_listener_is_single() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    let runtime = BusRuntime::new(2);

    let listener = transport
        .queue("orders")
        .build_listener(&runtime, RecordingReceiver::new(Behavior::Accept))
        .await
        .unwrap();

    assert!(!listener.is_parallel());
    assert_eq!(listener.consumer_count(), 1);
    assert_eq!(listener.address().to_string(), "rabbitmq://queue/orders");
    assert!(format!("{listener:?}").starts_with("Single(\"rabbitmq://queue/orders\""));
    wait_until(|| broker.calls().qos == 1).await;

    listener.stop().await;
}

#[tokio::test]
async fn several_listeners_are_parallel_with_own_channels() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    transport
        .configure_queue("orders", SubscriberConfiguration::new().listener_count(3))
        .unwrap();
    let runtime = BusRuntime::new(2);

    let listener = transport
        .build_listener("orders", &runtime, RecordingReceiver::new(Behavior::Accept))
        .await
        .unwrap();

    assert!(listener.is_parallel());
    assert_eq!(listener.consumer_count(), 3);
    assert!(format!("{listener:?}").starts_with("Parallel(\"rabbitmq://queue/orders\""));
    wait_until(|| broker.open_channels() == 3).await;
    assert_eq!(broker.calls().qos, 3);

    listener.stop().await;
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn concurrent_builds_initialize_once() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    let queue = transport.queue("orders");
    let runtime = BusRuntime::new(1);
    let receiver = RecordingReceiver::new(Behavior::Accept);

    let (a, b) = tokio::join!(
        queue.build_listener(&runtime, receiver.clone()),
        queue.build_listener(&runtime, receiver.clone()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(broker.calls().declare, 1);
    assert!(queue.has_declared());

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn unknown_queue_cannot_be_listened_to() {
    let (_broker, transport) = transport(TransportOptions::default());
    let err = transport
        .build_listener(
            "missing",
            &BusRuntime::new(1),
            RecordingReceiver::new(Behavior::Accept),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::UnknownQueue(name) if name == "missing"));
}
