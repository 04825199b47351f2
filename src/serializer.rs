//! Message serializers used to write envelope bodies for a transport.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Content type of the built-in JSON serializer.
pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("no serializer registered for content type {0}")]
    UnknownContentType(String),
}

/// Writes and reads message bodies.
///
/// Implementations are registered on an endpoint by content type; the
/// endpoint's default serializer writes outgoing envelopes.
pub trait MessageSerializer: Send + Sync {
    fn content_type(&self) -> &str;

    fn write(&self, message: &serde_json::Value) -> Result<Vec<u8>, SerializationError>;

    fn read(&self, data: &[u8]) -> Result<serde_json::Value, SerializationError>;
}

impl fmt::Debug for dyn MessageSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageSerializer({})", self.content_type())
    }
}

/// JSON via serde_json.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn write(&self, message: &serde_json::Value) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(message).map_err(|e| SerializationError::Encode(e.to_string()))
    }

    fn read(&self, data: &[u8]) -> Result<serde_json::Value, SerializationError> {
        serde_json::from_slice(data).map_err(|e| SerializationError::Decode(e.to_string()))
    }
}

pub fn json() -> Arc<dyn MessageSerializer> {
    Arc::new(JsonSerializer)
}
