//! Shared fixtures for listener tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use durable_bus::broker::InMemoryBroker;
use durable_bus::{
    CircuitBreaker, CircuitBreakerFactory, CircuitBreakerParameters, EndpointUri, Envelope,
    ReceiveError, Receiver, Transport, TransportOptions,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

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

pub fn envelope(n: u32) -> Envelope {
    Envelope::new("OrderPlaced", json!({ "n": n }))
        .to(EndpointUri::queue("rabbitmq", "orders"))
}

/// Poll `condition` every 10ms for up to 5 seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Accept,
    /// Ask for a retry on the first delivery of each envelope.
    RetryFirst,
    Reject,
}

/// Records every envelope it receives.
pub struct RecordingReceiver {
    behavior: Behavior,
    delay: Duration,
    started: AtomicUsize,
    received: Mutex<Vec<Envelope>>,
}

impl RecordingReceiver {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Self::with_delay(behavior, Duration::ZERO)
    }

    pub fn with_delay(behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            delay,
            started: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        })
    }

    /// Envelopes whose handling has begun.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl Receiver for RecordingReceiver {
    async fn receive(&self, envelope: Envelope) -> Result<(), ReceiveError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let attempts = envelope.attempts;
        self.received.lock().unwrap().push(envelope);
        match self.behavior {
            Behavior::Accept => Ok(()),
            Behavior::RetryFirst if attempts == 1 => Err(ReceiveError::retry("not yet")),
            Behavior::RetryFirst => Ok(()),
            Behavior::Reject => Err(ReceiveError::reject("poison")),
        }
    }
}

/// A breaker opened and closed by the test.
#[derive(Default)]
pub struct SwitchBreaker {
    pub open: AtomicBool,
    pub successes: AtomicUsize,
    pub failures: AtomicUsize,
}

impl CircuitBreaker for SwitchBreaker {
    fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct SwitchFactory {
    pub breaker: Arc<SwitchBreaker>,
    pub created: AtomicUsize,
}

impl CircuitBreakerFactory for SwitchFactory {
    fn create(
        &self,
        _endpoint: &EndpointUri,
        _parameters: &CircuitBreakerParameters,
    ) -> Arc<dyn CircuitBreaker> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.breaker.clone()
    }
}
