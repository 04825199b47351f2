//! Broker and channel traits, plus the scoped channel lease.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use async_trait::async_trait;

use super::error::BrokerError;
use crate::envelope::{Delivery, Envelope};

/// Attributes sent with a queue declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: HashMap<String, serde_json::Value>,
}

/// A connection to a message broker that hands out channels.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// A single broker channel.
///
/// The first five methods are the administrative primitives; the rest are
/// what listeners and senders need to move envelopes.
#[async_trait]
pub trait BrokerChannel: Send {
    async fn declare(&mut self, declaration: &QueueDeclaration) -> Result<(), BrokerError>;

    /// Existence check. Fails with [`BrokerError::NotFound`] when absent.
    async fn declare_passive(&mut self, queue: &str) -> Result<(), BrokerError>;

    /// Remove all ready messages, returning how many were dropped.
    async fn purge(&mut self, queue: &str) -> Result<u32, BrokerError>;

    async fn delete(&mut self, queue: &str) -> Result<(), BrokerError>;

    async fn message_count(&mut self, queue: &str) -> Result<u32, BrokerError>;

    /// Bound the unacknowledged deliveries on this channel. Zero means
    /// unlimited for either value.
    async fn qos(&mut self, prefetch_size: u32, prefetch_count: u16) -> Result<(), BrokerError>;

    async fn publish(&mut self, queue: &str, envelope: Envelope) -> Result<(), BrokerError>;

    /// Wait for the next delivery on `queue`, respecting the prefetch window.
    ///
    /// Must be cancel safe: dropping the future before it completes must not
    /// lose a message.
    async fn next_delivery(&mut self, queue: &str) -> Result<Delivery, BrokerError>;

    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError>;

    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Release the channel. Unacknowledged deliveries go back to their queue.
    fn close(&mut self);
}

/// A channel that is closed when the lease goes out of scope, on every exit
/// path.
pub struct ChannelLease {
    channel: Box<dyn BrokerChannel>,
}

impl ChannelLease {
    pub async fn acquire(broker: &dyn Broker) -> Result<Self, BrokerError> {
        let channel = broker.open_channel().await?;
        Ok(Self { channel })
    }
}

impl Deref for ChannelLease {
    type Target = dyn BrokerChannel;

    fn deref(&self) -> &Self::Target {
        self.channel.as_ref()
    }
}

impl DerefMut for ChannelLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.channel.as_mut()
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.channel.close();
    }
}
