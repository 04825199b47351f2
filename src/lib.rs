//! Durable messaging transport core.
//!
//! - [`transport`]: the queue registry and the queue lifecycle (declare,
//!   check, setup, teardown, purge) against a [`broker::Broker`].
//! - [`listener`]: prefetch-bounded consumption loops, single or parallel.
//! - [`outbox`]: a [`MessageContext`] that holds outgoing envelopes until the
//!   unit of work commits, then flushes them.
//! - [`configuration`]: deferred endpoint configuration.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use durable_bus::{broker::InMemoryBroker, BusRuntime, SubscriberConfiguration, Transport, TransportOptions};
//!
//! let transport = Transport::new(
//!     Arc::new(InMemoryBroker::new()),
//!     TransportOptions::default().with_auto_provision(true),
//! );
//! transport.configure_queue("orders", SubscriberConfiguration::new().durable().listener_count(4))?;
//!
//! let runtime = BusRuntime::new(4);
//! let listener = transport.build_listener("orders", &runtime, receiver).await?;
//! ```

pub mod broker;
pub mod circuit_breaker;
pub mod configuration;
pub mod endpoint;
pub mod envelope;
mod error;
pub mod listener;
pub mod outbox;
pub mod runtime;
pub mod serializer;
pub mod transport;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerFactory, CircuitBreakerParameters};
pub use configuration::SubscriberConfiguration;
pub use endpoint::{ConfigurableEndpoint, Endpoint, EndpointMode, EndpointRole, EndpointUri};
pub use envelope::{Delivery, Envelope};
pub use error::{ConfigurationError, Result, TransportError};
pub use listener::{Listener, ListenerStats, ReceiveError, Receiver};
pub use outbox::{
    CommitOutcome, EnvelopeSender, FlushPolicy, FlushReport, MessageContext, OutboxError,
    PartialSend, SendError, UnitOfWork, UnitOfWorkError,
};
pub use runtime::BusRuntime;
pub use serializer::{JsonSerializer, MessageSerializer, SerializationError};
pub use transport::{Queue, QueueState, Transport, TransportOptions};
