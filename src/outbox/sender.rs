use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::TransportError;

/// Why an envelope could not be handed to a transport.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("envelope {0} has no destination")]
    NoDestination(Uuid),

    #[error("no transport for destination {0}")]
    UnsupportedDestination(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SendError {
    /// Whether retrying the same send may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SendError::Transport(TransportError::Broker(e)) => e.is_transient(),
            _ => false,
        }
    }
}

/// A batch send that stopped early.
#[derive(Error, Debug)]
#[error("sent {sent} envelope(s) before failing: {error}")]
pub struct PartialSend {
    /// Envelopes accepted, from the front of the batch.
    pub sent: usize,
    #[source]
    pub error: SendError,
}

/// Dispatches envelopes to their destination.
#[async_trait]
pub trait EnvelopeSender: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), SendError>;

    /// Send `envelopes` in order, stopping at the first failure.
    ///
    /// Senders with per-send setup cost can override this to share it across
    /// the batch.
    async fn send_batch(&self, envelopes: &[Envelope]) -> Result<(), PartialSend> {
        for (sent, envelope) in envelopes.iter().enumerate() {
            if let Err(error) = self.send(envelope.clone()).await {
                return Err(PartialSend { sent, error });
            }
        }
        Ok(())
    }
}
