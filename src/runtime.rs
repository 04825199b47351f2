//! What the transport needs from the hosting runtime.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitBreakerFactory;

/// Runtime settings and signals shared by listeners.
///
/// Cloning shares the shutdown token, so cancelling any clone stops every
/// listener built against the runtime.
#[derive(Clone)]
pub struct BusRuntime {
    max_parallelism: usize,
    shutdown: CancellationToken,
    breakers: Option<Arc<dyn CircuitBreakerFactory>>,
    retry_delay: Duration,
}

impl BusRuntime {
    /// Create a runtime with the given maximum handler parallelism.
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
            shutdown: CancellationToken::new(),
            breakers: None,
            retry_delay: Duration::from_millis(100),
        }
    }

    /// Use the available hardware parallelism.
    pub fn with_available_parallelism() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self::new(cores)
    }

    /// Use an externally owned shutdown token.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_circuit_breakers(mut self, factory: Arc<dyn CircuitBreakerFactory>) -> Self {
        self.breakers = Some(factory);
        self
    }

    /// How long a listener waits before retrying after a broker error.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn circuit_breakers(&self) -> Option<&Arc<dyn CircuitBreakerFactory>> {
        self.breakers.as_ref()
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Signal every listener built against this runtime to stop.
    pub fn shutdown(&self) {
        tracing::info!("Bus runtime shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Default for BusRuntime {
    fn default() -> Self {
        Self::with_available_parallelism()
    }
}

impl fmt::Debug for BusRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusRuntime")
            .field("max_parallelism", &self.max_parallelism)
            .field("shutting_down", &self.is_shutting_down())
            .field("circuit_breakers", &self.breakers.is_some())
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}
