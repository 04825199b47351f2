//! Circuit breaker configuration.
//!
//! [`CircuitBreakerParameters`] is attached to an endpoint through
//! [`SubscriberConfiguration::circuit_breaking`](crate::SubscriberConfiguration::circuit_breaking).
//! The live breaker, which keeps the counters, belongs to the runtime: it is
//! created by a [`CircuitBreakerFactory`] on the [`BusRuntime`](crate::BusRuntime),
//! and listener loops feed it outcomes and pause receiving while it is open.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::EndpointUri;
use crate::error::ConfigurationError;

/// Thresholds for tripping a circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerParameters {
    /// Failure rate, in percent, at which the breaker trips.
    pub failure_percentage_threshold: u8,
    /// Number of messages that must be seen in the tracking period before the
    /// failure rate is considered.
    pub minimum_threshold: u32,
    /// Window over which failures are counted.
    pub tracking_period: Duration,
    /// Cool-down before the endpoint resumes after tripping.
    pub pause_time: Duration,
    /// How often the runtime re-evaluates the failure rate.
    pub sampling_period: Duration,
}

impl Default for CircuitBreakerParameters {
    fn default() -> Self {
        Self {
            failure_percentage_threshold: 10,
            minimum_threshold: 10,
            tracking_period: Duration::from_secs(600),
            pause_time: Duration::from_secs(5),
            sampling_period: Duration::from_millis(250),
        }
    }
}

impl CircuitBreakerParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_percentage_threshold(mut self, percent: u8) -> Self {
        self.failure_percentage_threshold = percent;
        self
    }

    pub fn with_minimum_threshold(mut self, minimum: u32) -> Self {
        self.minimum_threshold = minimum;
        self
    }

    pub fn with_tracking_period(mut self, period: Duration) -> Self {
        self.tracking_period = period;
        self
    }

    pub fn with_pause_time(mut self, pause: Duration) -> Self {
        self.pause_time = pause;
        self
    }

    pub fn with_sampling_period(mut self, period: Duration) -> Self {
        self.sampling_period = period;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.failure_percentage_threshold == 0 || self.failure_percentage_threshold > 100 {
            return Err(ConfigurationError::invalid(
                "failure_percentage_threshold must be between 1 and 100",
            ));
        }
        if self.tracking_period.is_zero() {
            return Err(ConfigurationError::invalid("tracking_period must be > 0"));
        }
        if self.sampling_period.is_zero() || self.sampling_period > self.tracking_period {
            return Err(ConfigurationError::invalid(
                "sampling_period must be > 0 and no longer than tracking_period",
            ));
        }
        Ok(())
    }

    /// Whether `failures` out of `total` messages breach the thresholds.
    pub fn is_breached(&self, total: u32, failures: u32) -> bool {
        if total == 0 || total < self.minimum_threshold {
            return false;
        }
        (failures as u64) * 100 >= (self.failure_percentage_threshold as u64) * (total as u64)
    }
}

/// A live breaker owned by the runtime.
pub trait CircuitBreaker: Send + Sync {
    fn record_success(&self);

    fn record_failure(&self);

    /// While open, the endpoint stops receiving until the pause elapses.
    fn is_open(&self) -> bool;
}

/// Creates live breakers for endpoints that have parameters attached.
pub trait CircuitBreakerFactory: Send + Sync {
    fn create(
        &self,
        endpoint: &EndpointUri,
        parameters: &CircuitBreakerParameters,
    ) -> Arc<dyn CircuitBreaker>;
}
