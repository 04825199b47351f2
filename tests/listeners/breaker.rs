//! Circuit breaking: outcomes are recorded and an open breaker pauses receiving.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use durable_bus::{
    BusRuntime, CircuitBreakerParameters, EnvelopeSender, SubscriberConfiguration,
    TransportError, TransportOptions,
};

use crate::support::{envelope, transport, wait_until, Behavior, RecordingReceiver, SwitchFactory};

fn parameters() -> CircuitBreakerParameters {
    CircuitBreakerParameters::default().with_pause_time(Duration::from_millis(20))
}

#[tokio::test]
async fn open_breaker_pauses_consumption() {
    let (broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    transport
        .configure_queue(
            "orders",
            SubscriberConfiguration::new().circuit_breaking(parameters()),
        )
        .unwrap();
    transport.queue("orders").setup().await.unwrap();
    let factory = Arc::new(SwitchFactory::default());
    factory.breaker.open.store(true, Ordering::SeqCst);
    let runtime = BusRuntime::new(1).with_circuit_breakers(factory.clone());
    let receiver = RecordingReceiver::new(Behavior::Accept);

    let listener = transport
        .build_listener("orders", &runtime, receiver.clone())
        .await
        .unwrap();
    transport.send(envelope(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(receiver.count(), 0);
    assert_eq!(broker.ready_count("orders"), 1);

    factory.breaker.open.store(false, Ordering::SeqCst);
    wait_until(|| receiver.count() == 1).await;
    listener.stop().await;

    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    assert_eq!(factory.breaker.successes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failures_are_recorded() {
    let (_broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    transport
        .configure_queue(
            "orders",
            SubscriberConfiguration::new().circuit_breaking(parameters()),
        )
        .unwrap();
    transport.queue("orders").setup().await.unwrap();
    transport.send(envelope(1)).await.unwrap();
    let factory = Arc::new(SwitchFactory::default());
    let runtime = BusRuntime::new(1).with_circuit_breakers(factory.clone());
    let receiver = RecordingReceiver::new(Behavior::Reject);

    let listener = transport
        .build_listener("orders", &runtime, receiver.clone())
        .await
        .unwrap();
    wait_until(|| factory.breaker.failures.load(Ordering::SeqCst) == 1).await;
    listener.stop().await;
}

#[tokio::test]
async fn queues_without_parameters_get_no_breaker() {
    let (_broker, transport) = transport(TransportOptions::default().with_auto_provision(true));
    let factory = Arc::new(SwitchFactory::default());
    let runtime = BusRuntime::new(1).with_circuit_breakers(factory.clone());

    let listener = transport
        .queue("orders")
        .build_listener(&runtime, RecordingReceiver::new(Behavior::Accept))
        .await
        .unwrap();
    listener.stop().await;

    assert_eq!(factory.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_parameters_are_refused_at_configuration() {
    let (_broker, transport) = transport(TransportOptions::default());
    let err = transport
        .configure_queue(
            "orders",
            SubscriberConfiguration::new()
                .circuit_breaking(parameters().with_failure_percentage_threshold(150)),
        )
        .unwrap_err();
    assert!(matches!(err, TransportError::Configuration(_)));
}
