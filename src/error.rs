use thiserror::Error;

use crate::broker::BrokerError;
use crate::endpoint::UriError;
use crate::serializer::SerializationError;

/// Errors from transport, queue and listener operations.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("endpoint {0} is active and can no longer be reconfigured")]
    EndpointActive(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Invalid options or endpoint configuration.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Uri(#[from] UriError),
}

impl ConfigurationError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigurationError::Invalid(message.into())
    }
}
