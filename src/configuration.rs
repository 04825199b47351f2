//! Deferred endpoint configuration.
//!
//! Options are recorded in call order and applied together when the endpoint
//! is built, so a later option overrides an earlier one.
//!
//! ```ignore
//! transport.configure_queue(
//!     "orders",
//!     SubscriberConfiguration::new()
//!         .durable()
//!         .listener_count(4)
//!         .time_to_live(Duration::from_secs(30))
//!         .circuit_breaking(CircuitBreakerParameters::default()),
//! )?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerParameters;
use crate::endpoint::{ConfigurableEndpoint, EndpointMode, OutgoingRule};
use crate::envelope::Envelope;
use crate::serializer::MessageSerializer;
use crate::transport::Queue;

type Step<E> = Box<dyn FnOnce(&mut E) + Send>;

/// An ordered list of configuration steps for an endpoint of type `E`.
pub struct SubscriberConfiguration<E> {
    steps: Vec<Step<E>>,
}

impl<E: ConfigurableEndpoint + 'static> SubscriberConfiguration<E> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Record an arbitrary mutation of the endpoint.
    pub fn configure<F>(mut self, step: F) -> Self
    where
        F: FnOnce(&mut E) + Send + 'static,
    {
        self.steps.push(Box::new(step));
        self
    }

    /// Back incoming and outgoing messages with the durable inbox/outbox.
    pub fn durable(self) -> Self {
        self.configure(|e| e.endpoint_mut().set_mode(EndpointMode::Durable))
    }

    pub fn buffered_in_memory(self) -> Self {
        self.configure(|e| e.endpoint_mut().set_mode(EndpointMode::BufferedInMemory))
    }

    pub fn send_inline(self) -> Self {
        self.configure(|e| e.endpoint_mut().set_mode(EndpointMode::Inline))
    }

    /// Set the descriptive name of the endpoint. The address is unchanged.
    pub fn named(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.configure(move |e| e.endpoint_mut().set_name(name))
    }

    pub fn default_serializer(self, serializer: Arc<dyn MessageSerializer>) -> Self {
        self.configure(move |e| e.endpoint_mut().set_default_serializer(serializer))
    }

    pub fn add_serializer(self, serializer: Arc<dyn MessageSerializer>) -> Self {
        self.configure(move |e| e.endpoint_mut().register_serializer(serializer))
    }

    /// Mutate every envelope sent through the endpoint.
    pub fn customize_outgoing<F>(self, mutate: F) -> Self
    where
        F: Fn(&mut Envelope) + Send + Sync + 'static,
    {
        self.add_rule(OutgoingRule::all(mutate))
    }

    /// Mutate outgoing envelopes whose message type name matches.
    pub fn customize_outgoing_messages_of_type<F>(
        self,
        message_type: impl Into<String>,
        mutate: F,
    ) -> Self
    where
        F: Fn(&mut Envelope) + Send + Sync + 'static,
    {
        self.add_rule(OutgoingRule::for_message_type(message_type, mutate))
    }

    /// Mutate outgoing envelopes carrying a `T`.
    pub fn customize_outgoing_of<T: 'static, F>(self, mutate: F) -> Self
    where
        F: Fn(&mut Envelope) + Send + Sync + 'static,
    {
        self.add_rule(OutgoingRule::for_message::<T, F>(mutate))
    }

    pub fn circuit_breaking(self, parameters: CircuitBreakerParameters) -> Self {
        self.configure(move |e| e.endpoint_mut().set_circuit_breaker(parameters))
    }

    fn add_rule(self, rule: OutgoingRule) -> Self {
        self.configure(move |e| e.endpoint_mut().add_outgoing_rule(rule))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every recorded step against the endpoint, in order.
    pub fn apply(self, endpoint: &mut E) {
        for step in self.steps {
            step(endpoint);
        }
    }
}

impl SubscriberConfiguration<Queue> {
    /// Number of parallel consumption loops.
    pub fn listener_count(self, count: usize) -> Self {
        self.configure(move |q| q.set_listener_count(count))
    }

    pub fn prefetch_count(self, count: u16) -> Self {
        self.configure(move |q| q.set_prefetch_count(count))
    }

    pub fn prefetch_size(self, bytes: u32) -> Self {
        self.configure(move |q| q.set_prefetch_size(bytes))
    }

    pub fn purge_on_startup(self) -> Self {
        self.configure(|q| q.set_purge_on_startup(true))
    }

    pub fn time_to_live(self, ttl: Duration) -> Self {
        self.configure(move |q| q.set_time_to_live(ttl))
    }

    pub fn argument(self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let key = key.into();
        self.configure(move |q| q.set_argument(key, value))
    }

    /// Whether the broker keeps the queue across restarts.
    pub fn durable_queue(self, durable: bool) -> Self {
        self.configure(move |q| q.set_durable(durable))
    }

    pub fn exclusive(self) -> Self {
        self.configure(|q| q.set_exclusive(true))
    }

    pub fn auto_delete(self) -> Self {
        self.configure(|q| q.set_auto_delete(true))
    }
}

impl<E: ConfigurableEndpoint + 'static> Default for SubscriberConfiguration<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for SubscriberConfiguration<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberConfiguration")
            .field("steps", &self.steps.len())
            .finish()
    }
}
