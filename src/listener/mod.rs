//! Listeners - consumption loops over a broker queue.
//!
//! A queue with a listener count of one gets a [`Listener::Single`] consumer.
//! Larger counts get a [`Listener::Parallel`] listener: independent loops, each
//! on its own channel with its own prefetch window, so one slow consumer does
//! not hold back deliveries to the others.
//!
//! Buffered and durable queues read ahead: each loop keeps pulling deliveries
//! into a local buffer while its receiver works, until the broker's prefetch
//! window is full. Inline queues take one delivery at a time.
//!
//! ```ignore
//! let listener = transport.queue("orders").build_listener(&runtime, receiver).await?;
//! // ...
//! let stats = listener.stop().await;
//! ```

mod consumer;
mod receiver;

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use consumer::ConsumerLoop;
pub use receiver::{ListenerStats, ReceiveError, Receiver};

use consumer::ConsumerSettings;
use crate::endpoint::{ConfigurableEndpoint, EndpointUri};
use crate::runtime::BusRuntime;
use crate::transport::Queue;

/// Several consumption loops on one queue, stopped together.
pub struct ParallelListener {
    token: CancellationToken,
    consumers: Vec<ConsumerLoop>,
}

impl ParallelListener {
    async fn stop(mut self) -> ListenerStats {
        self.token.cancel();
        let mut stats = ListenerStats::default();
        for consumer in std::mem::take(&mut self.consumers) {
            stats = stats.merge(consumer.stop().await);
        }
        stats
    }
}

impl Drop for ParallelListener {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for ParallelListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelListener")
            .field("consumers", &self.consumers)
            .finish()
    }
}

/// A running listener on a queue.
pub enum Listener {
    Single(ConsumerLoop, EndpointUri),
    Parallel(ParallelListener, EndpointUri),
}

impl Listener {
    /// Spawn the consumption loops for `queue`.
    ///
    /// Every loop stops when the runtime shuts down.
    pub(crate) fn start(queue: Arc<Queue>, runtime: &BusRuntime, receiver: Arc<dyn Receiver>) -> Self {
        let prefetch_count = queue.resolved_prefetch_count(runtime.max_parallelism());
        let (breaker, pause_time) = match (runtime.circuit_breakers(), queue.endpoint().circuit_breaker()) {
            (Some(factory), Some(parameters)) => (
                Some(factory.create(queue.uri(), parameters)),
                parameters.pause_time,
            ),
            _ => (None, Default::default()),
        };

        let address = queue.uri().clone();
        let count = queue.listener_count();
        info!(
            queue = %queue.queue_name(),
            consumers = count,
            prefetch = prefetch_count,
            circuit_breaker = breaker.is_some(),
            "Starting listener"
        );

        let buffer_capacity =
            ConsumerSettings::capacity_for(queue.endpoint().mode(), prefetch_count);
        let settings = ConsumerSettings {
            queue,
            receiver,
            breaker,
            pause_time,
            prefetch_count,
            buffer_capacity,
            retry_delay: runtime.retry_delay(),
        };

        let token = runtime.shutdown_token().child_token();
        if count == 1 {
            return Listener::Single(ConsumerLoop::spawn(0, settings, token), address);
        }

        let consumers = (0..count)
            .map(|id| ConsumerLoop::spawn(id, settings.clone(), token.child_token()))
            .collect();
        Listener::Parallel(ParallelListener { token, consumers }, address)
    }

    pub fn address(&self) -> &EndpointUri {
        match self {
            Listener::Single(_, address) | Listener::Parallel(_, address) => address,
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Listener::Parallel(..))
    }

    pub fn consumer_count(&self) -> usize {
        match self {
            Listener::Single(..) => 1,
            Listener::Parallel(parallel, _) => parallel.consumers.len(),
        }
    }

    /// Stop every loop, wait for in-flight messages to settle, and return the
    /// combined stats.
    pub async fn stop(self) -> ListenerStats {
        match self {
            Listener::Single(consumer, _) => consumer.stop().await,
            Listener::Parallel(parallel, _) => parallel.stop().await,
        }
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&self) {
        match self {
            Listener::Single(consumer, _) => consumer.signal_stop(),
            Listener::Parallel(parallel, _) => parallel.token.cancel(),
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Single(consumer, address) => f
                .debug_tuple("Single")
                .field(&address.to_string())
                .field(consumer)
                .finish(),
            Listener::Parallel(parallel, address) => f
                .debug_tuple("Parallel")
                .field(&address.to_string())
                .field(parallel)
                .finish(),
        }
    }
}
