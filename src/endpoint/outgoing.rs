use std::fmt;
use std::sync::Arc;

use crate::envelope::{message_type_name, Envelope};

type Mutation = Arc<dyn Fn(&mut Envelope) + Send + Sync>;

/// An envelope mutation run when an envelope is sent to an endpoint,
/// optionally limited to one message type.
#[derive(Clone)]
pub struct OutgoingRule {
    message_type: Option<String>,
    mutate: Mutation,
}

impl OutgoingRule {
    /// Applies to every outgoing envelope.
    pub fn all<F>(mutate: F) -> Self
    where
        F: Fn(&mut Envelope) + Send + Sync + 'static,
    {
        Self {
            message_type: None,
            mutate: Arc::new(mutate),
        }
    }

    /// Applies only to envelopes whose message type name matches.
    pub fn for_message_type<F>(message_type: impl Into<String>, mutate: F) -> Self
    where
        F: Fn(&mut Envelope) + Send + Sync + 'static,
    {
        Self {
            message_type: Some(message_type.into()),
            mutate: Arc::new(mutate),
        }
    }

    /// Applies only to envelopes carrying a `T`.
    pub fn for_message<T: 'static, F>(mutate: F) -> Self
    where
        F: Fn(&mut Envelope) + Send + Sync + 'static,
    {
        Self::for_message_type(message_type_name::<T>(), mutate)
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.message_type
            .as_deref()
            .map_or(true, |t| t == envelope.message_type)
    }

    /// Run the mutation if the envelope matches.
    pub fn apply(&self, envelope: &mut Envelope) {
        if self.matches(envelope) {
            (self.mutate)(envelope);
        }
    }
}

impl fmt::Debug for OutgoingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingRule")
            .field("message_type", &self.message_type)
            .finish_non_exhaustive()
    }
}
