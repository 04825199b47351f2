use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Prefix reserved for queues the framework creates for itself.
pub const DEFAULT_SYSTEM_QUEUE_PREFIX: &str = "wolverine.";

/// Transport-wide policy flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Uri scheme for queue addresses.
    pub scheme: String,
    /// Declare queues on initialization.
    pub auto_provision: bool,
    /// Purge every purgeable queue on initialization.
    pub auto_purge_all_queues: bool,
    /// Queue names starting with this prefix belong to the framework.
    pub system_queue_prefix: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            scheme: "rabbitmq".to_string(),
            auto_provision: false,
            auto_purge_all_queues: false,
            system_queue_prefix: DEFAULT_SYSTEM_QUEUE_PREFIX.to_string(),
        }
    }
}

impl TransportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_auto_provision(mut self, enabled: bool) -> Self {
        self.auto_provision = enabled;
        self
    }

    pub fn with_auto_purge_all_queues(mut self, enabled: bool) -> Self {
        self.auto_purge_all_queues = enabled;
        self
    }

    pub fn with_system_queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.system_queue_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.scheme.trim().is_empty() || self.scheme.contains("://") {
            return Err(ConfigurationError::invalid("scheme must be a bare uri scheme"));
        }
        if self.system_queue_prefix.is_empty() {
            return Err(ConfigurationError::invalid("system_queue_prefix is empty"));
        }
        Ok(())
    }
}
