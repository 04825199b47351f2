//! Shared fixtures for queue lifecycle tests.

use std::sync::Arc;

use durable_bus::broker::InMemoryBroker;
use durable_bus::{Transport, TransportOptions};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn transport(options: TransportOptions) -> (InMemoryBroker, Transport) {
    init_tracing();
    let broker = InMemoryBroker::new();
    let transport = Transport::new(Arc::new(broker.clone()), options);
    (broker, transport)
}

pub fn default_transport() -> (InMemoryBroker, Transport) {
    transport(TransportOptions::default())
}
