//! Envelope - a message plus its delivery metadata.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::endpoint::EndpointUri;
use crate::serializer::SerializationError;

/// A message plus the metadata needed to deliver it.
///
/// The message body travels in-process as a JSON value. `data` and
/// `content_type` are filled in by the destination endpoint's serializer at
/// send time, and read back by the listener before the envelope reaches a
/// [`Receiver`](crate::listener::Receiver).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique identifier for this envelope
    pub id: Uuid,
    /// Message type name (e.g., "OrderPlaced")
    pub message_type: String,
    /// Message body
    pub message: serde_json::Value,
    /// Serialized body, present once the envelope has been written for a transport
    pub data: Option<Vec<u8>>,
    /// Content type of `data`
    pub content_type: Option<String>,
    /// Where the envelope is going
    pub destination: Option<EndpointUri>,
    /// Headers (correlation IDs, tenant, trace context, etc.)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Number of delivery attempts so far
    pub attempts: u32,
}

impl Envelope {
    /// Create an envelope with the given type and body.
    pub fn new(message_type: impl Into<String>, message: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message_type.into(),
            message,
            data: None,
            content_type: None,
            destination: None,
            headers: HashMap::new(),
            attempts: 0,
        }
    }

    /// Create an envelope for a typed message. The message type name is the
    /// last path segment of the Rust type name.
    pub fn for_message<T: Serialize + 'static>(message: &T) -> Result<Self, SerializationError> {
        let value = serde_json::to_value(message)
            .map_err(|e| SerializationError::Encode(e.to_string()))?;
        Ok(Self::new(message_type_name::<T>(), value))
    }

    /// Set the destination.
    pub fn to(mut self, destination: EndpointUri) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Add a header to the envelope.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Deserialize the message body into a typed struct.
    pub fn message_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, SerializationError> {
        serde_json::from_value(self.message.clone())
            .map_err(|e| SerializationError::Decode(e.to_string()))
    }

    /// Size of the serialized body in bytes (0 when not yet written).
    pub fn size(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn set_correlation_id(&mut self, id: impl Into<String>) {
        self.set_header("correlation-id", id);
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.header("correlation-id")
    }

    pub fn set_causation_id(&mut self, id: impl Into<String>) {
        self.set_header("causation-id", id);
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.header("causation-id")
    }

    /// Whether this envelope carries a message of type `T`.
    pub fn is_message_of<T: 'static>(&self) -> bool {
        self.message_type == message_type_name::<T>()
    }
}

/// A broker delivery: an envelope plus the tag used to ack or nack it.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub tag: u64,
    pub envelope: Envelope,
    pub redelivered: bool,
}

/// Short type name used as the envelope message type.
pub fn message_type_name<T: ?Sized + 'static>() -> &'static str {
    let full = std::any::type_name::<T>();
    // Generic parameters keep their full paths; only trim the outer path.
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}
