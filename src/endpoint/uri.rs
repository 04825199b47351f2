use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Path segment used for queue addresses.
pub const QUEUE_SEGMENT: &str = "queue";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid endpoint uri {uri}: {reason}")]
pub struct UriError {
    pub uri: String,
    pub reason: &'static str,
}

/// Address of an endpoint, in the form `scheme://segment/name`
/// (e.g. `rabbitmq://queue/orders`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointUri {
    scheme: String,
    segment: String,
    name: String,
}

impl EndpointUri {
    pub fn new(
        scheme: impl Into<String>,
        segment: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            segment: segment.into(),
            name: name.into(),
        }
    }

    /// `scheme://queue/name`
    pub fn queue(scheme: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(scheme, QUEUE_SEGMENT, name)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_queue(&self) -> bool {
        self.segment == QUEUE_SEGMENT
    }
}

impl fmt::Display for EndpointUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.segment, self.name)
    }
}

impl FromStr for EndpointUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason| UriError {
            uri: s.to_string(),
            reason,
        };
        let (scheme, rest) = s.split_once("://").ok_or_else(|| error("missing scheme"))?;
        let (segment, name) = rest
            .split_once('/')
            .ok_or_else(|| error("expected segment/name"))?;
        if scheme.is_empty() || segment.is_empty() || name.is_empty() {
            return Err(error("empty component"));
        }
        Ok(Self::new(scheme, segment, name))
    }
}

impl TryFrom<String> for EndpointUri {
    type Error = UriError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EndpointUri> for String {
    fn from(uri: EndpointUri) -> Self {
        uri.to_string()
    }
}
