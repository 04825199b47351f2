use thiserror::Error;

/// Errors reported by a broker channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The queue already exists with a configuration that does not match the
    /// declaration (AMQP `PRECONDITION_FAILED`).
    #[error("queue {queue} already exists with incompatible arguments: {reason}")]
    IncompatibleDeclaration { queue: String, reason: String },

    #[error("queue not found: {0}")]
    NotFound(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    #[error("broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// The "already exists with incompatible configuration" case, which
    /// declaration treats as benign.
    pub fn is_incompatible_declaration(&self) -> bool {
        matches!(self, BrokerError::IncompatibleDeclaration { .. })
    }

    /// Errors worth retrying on a fresh channel.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionFailed(_) | BrokerError::ChannelClosed
        )
    }
}
