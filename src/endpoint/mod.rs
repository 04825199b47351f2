//! Endpoints - addressable configuration units for sending and receiving.

mod endpoint;
mod outgoing;
mod uri;

pub use endpoint::{Endpoint, EndpointMode, EndpointRole};
pub use outgoing::OutgoingRule;
pub use uri::{EndpointUri, UriError, QUEUE_SEGMENT};

/// Anything that wraps an [`Endpoint`] and can be configured through it.
pub trait ConfigurableEndpoint {
    fn endpoint(&self) -> &Endpoint;

    fn endpoint_mut(&mut self) -> &mut Endpoint;
}

impl ConfigurableEndpoint for Endpoint {
    fn endpoint(&self) -> &Endpoint {
        self
    }

    fn endpoint_mut(&mut self) -> &mut Endpoint {
        self
    }
}
