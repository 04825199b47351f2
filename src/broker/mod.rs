//! Broker abstraction - the primitives the transport needs from a message broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Transport / Queue / Listener                │
//! │  - admin: declare / check / purge / teardown / attributes   │
//! │  - consume: qos / next_delivery / ack / nack                │
//! │  - send: publish                                            │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Broker + BrokerChannel traits                  │
//! │  Broker: open_channel()                                     │
//! │  ChannelLease: closes the channel when dropped              │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                     │
//!          ▼                                     ▼
//! ┌─────────────────┐                 ┌─────────────────────┐
//! │ InMemoryBroker  │                 │  AMQP client adapter │
//! │   (included)    │                 │      (external)      │
//! └─────────────────┘                 └─────────────────────┘
//! ```

mod channel;
mod error;
#[cfg(feature = "in-memory")]
mod in_memory;

pub use channel::{Broker, BrokerChannel, ChannelLease, QueueDeclaration};
pub use error::BrokerError;
#[cfg(feature = "in-memory")]
pub use in_memory::{BrokerCalls, InMemoryBroker, InMemoryChannel};
