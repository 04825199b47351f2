//! Broker transport - the queue registry and the queue lifecycle.
//!
//! A [`Transport`] owns every [`Queue`] it knows about. Queues are configured
//! through [`Transport::configure_queue`] while nothing else holds them, then
//! initialized (declared and purged per [`TransportOptions`]) and consumed
//! through [`Queue::build_listener`].

mod options;
mod queue;
#[allow(clippy::module_inception)]
mod transport;

pub use options::{TransportOptions, DEFAULT_SYSTEM_QUEUE_PREFIX};
pub use queue::{Queue, QueueState, DEFAULT_PREFETCH_COUNT, MESSAGE_TTL_ARGUMENT};
pub use transport::Transport;

pub(crate) use transport::TransportCore;
