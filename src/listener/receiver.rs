use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::Envelope;

/// Why a receiver did not handle an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    /// Handling failed but may succeed later; the delivery is requeued.
    #[error("retry: {0}")]
    Retry(String),

    /// The envelope can never be handled; the delivery is dropped.
    #[error("rejected: {0}")]
    Reject(String),
}

impl ReceiveError {
    pub fn retry(reason: impl Into<String>) -> Self {
        ReceiveError::Retry(reason.into())
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        ReceiveError::Reject(reason.into())
    }

    pub fn requeues(&self) -> bool {
        matches!(self, ReceiveError::Retry(_))
    }
}

/// Hands received envelopes to the application.
///
/// Returning `Ok` acknowledges the delivery.
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn receive(&self, envelope: Envelope) -> Result<(), ReceiveError>;
}

/// Counters from one or more consumption loops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ListenerStats {
    /// Deliveries handled to completion and settled with the broker.
    pub received: usize,
    /// Deliveries handled and acknowledged.
    pub handled: usize,
    /// Deliveries that failed and were requeued.
    pub failed: usize,
    /// Deliveries dropped as unreadable or rejected by the receiver.
    pub rejected: usize,
}

impl ListenerStats {
    pub fn merge(self, other: ListenerStats) -> ListenerStats {
        ListenerStats {
            received: self.received + other.received,
            handled: self.handled + other.handled,
            failed: self.failed + other.failed,
            rejected: self.rejected + other.rejected,
        }
    }
}
