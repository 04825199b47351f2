use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::outgoing::OutgoingRule;
use super::uri::EndpointUri;
use crate::circuit_breaker::CircuitBreakerParameters;
use crate::envelope::Envelope;
use crate::serializer::{self, MessageSerializer, SerializationError};

/// Who an endpoint belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRole {
    /// Configured by the application.
    #[default]
    Application,
    /// Created by the framework for its own use (reply and control queues).
    System,
}

/// How messages move through an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointMode {
    /// Sent and received directly, one at a time.
    Inline,
    /// Buffered in memory in front of the handlers.
    #[default]
    BufferedInMemory,
    /// Backed by the durable inbox/outbox.
    Durable,
}

impl EndpointMode {
    /// Whether incoming messages are buffered locally before being handled.
    pub fn is_buffered(self) -> bool {
        matches!(self, EndpointMode::BufferedInMemory | EndpointMode::Durable)
    }
}

/// An addressable configuration unit for sending or receiving.
pub struct Endpoint {
    uri: EndpointUri,
    name: String,
    role: EndpointRole,
    mode: EndpointMode,
    serializers: HashMap<String, Arc<dyn MessageSerializer>>,
    default_serializer: Arc<dyn MessageSerializer>,
    outgoing_rules: Vec<OutgoingRule>,
    circuit_breaker: Option<CircuitBreakerParameters>,
}

impl Endpoint {
    /// Create an endpoint named after the last segment of its uri, with the
    /// JSON serializer as default.
    pub fn new(uri: EndpointUri, role: EndpointRole) -> Self {
        let json = serializer::json();
        let mut serializers = HashMap::new();
        serializers.insert(json.content_type().to_string(), Arc::clone(&json));
        Self {
            name: uri.name().to_string(),
            uri,
            role,
            mode: EndpointMode::default(),
            serializers,
            default_serializer: json,
            outgoing_rules: Vec::new(),
            circuit_breaker: None,
        }
    }

    pub fn uri(&self) -> &EndpointUri {
        &self.uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn set_role(&mut self, role: EndpointRole) {
        self.role = role;
    }

    pub fn mode(&self) -> EndpointMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: EndpointMode) {
        self.mode = mode;
    }

    /// Register a serializer by its content type, replacing any previous one.
    pub fn register_serializer(&mut self, serializer: Arc<dyn MessageSerializer>) {
        self.serializers
            .insert(serializer.content_type().to_string(), serializer);
    }

    /// Register a serializer and make it the one used for outgoing envelopes.
    pub fn set_default_serializer(&mut self, serializer: Arc<dyn MessageSerializer>) {
        self.register_serializer(Arc::clone(&serializer));
        self.default_serializer = serializer;
    }

    pub fn default_serializer(&self) -> &Arc<dyn MessageSerializer> {
        &self.default_serializer
    }

    pub fn serializer_for(&self, content_type: &str) -> Option<&Arc<dyn MessageSerializer>> {
        self.serializers.get(content_type)
    }

    pub fn add_outgoing_rule(&mut self, rule: OutgoingRule) {
        self.outgoing_rules.push(rule);
    }

    pub fn outgoing_rules(&self) -> &[OutgoingRule] {
        &self.outgoing_rules
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreakerParameters> {
        self.circuit_breaker.as_ref()
    }

    pub fn set_circuit_breaker(&mut self, parameters: CircuitBreakerParameters) {
        self.circuit_breaker = Some(parameters);
    }

    /// Prepare an envelope for sending: run the outgoing rules in the order
    /// they were added, then write the body with the default serializer.
    pub fn prepare_outgoing(&self, envelope: &mut Envelope) -> Result<(), SerializationError> {
        for rule in &self.outgoing_rules {
            rule.apply(envelope);
        }
        if envelope.destination.is_none() {
            envelope.destination = Some(self.uri.clone());
        }
        envelope.data = Some(self.default_serializer.write(&envelope.message)?);
        envelope.content_type = Some(self.default_serializer.content_type().to_string());
        Ok(())
    }

    /// Read an incoming envelope's body with the serializer matching its
    /// content type. Envelopes without data are left as they are.
    pub fn read_incoming(&self, envelope: &mut Envelope) -> Result<(), SerializationError> {
        let Some(data) = envelope.data.as_deref() else {
            return Ok(());
        };
        let serializer = match envelope.content_type.as_deref() {
            Some(content_type) => self
                .serializer_for(content_type)
                .ok_or_else(|| SerializationError::UnknownContentType(content_type.to_string()))?,
            None => &self.default_serializer,
        };
        envelope.message = serializer.read(data)?;
        Ok(())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("uri", &self.uri.to_string())
            .field("name", &self.name)
            .field("role", &self.role)
            .field("mode", &self.mode)
            .field("default_serializer", &self.default_serializer.content_type())
            .field("outgoing_rules", &self.outgoing_rules.len())
            .field("circuit_breaker", &self.circuit_breaker)
            .finish()
    }
}
