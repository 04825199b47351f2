use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use super::options::TransportOptions;
use super::queue::Queue;
use crate::broker::{Broker, ChannelLease};
use crate::configuration::SubscriberConfiguration;
use crate::endpoint::{ConfigurableEndpoint, EndpointRole};
use crate::envelope::Envelope;
use crate::error::{Result, TransportError};
use crate::listener::{Listener, Receiver};
use crate::outbox::{EnvelopeSender, PartialSend, SendError};
use crate::runtime::BusRuntime;

/// State shared between the transport and its queues.
pub(crate) struct TransportCore {
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) options: TransportOptions,
}

/// A broker transport: owns the queue registry and applies
/// transport-wide policy to every queue in it.
pub struct Transport {
    pub(crate) core: Arc<TransportCore>,
    queues: DashMap<String, Arc<Queue>>,
}

impl Transport {
    pub fn new(broker: Arc<dyn Broker>, options: TransportOptions) -> Self {
        Self {
            core: Arc::new(TransportCore { broker, options }),
            queues: DashMap::new(),
        }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.core.options
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.core.broker
    }

    /// Find a queue by name, registering it with defaults if unknown.
    pub fn queue(&self, name: &str) -> Arc<Queue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Queue::new(Arc::clone(&self.core), name)))
            .value()
            .clone()
    }

    pub fn find_queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).map(|q| Arc::clone(q.value()))
    }

    pub fn queues(&self) -> Vec<Arc<Queue>> {
        self.queues.iter().map(|q| Arc::clone(q.value())).collect()
    }

    /// Apply deferred configuration to a queue, registering it first if
    /// needed.
    ///
    /// Fails with [`TransportError::EndpointActive`] once the queue is shared
    /// with a listener or a caller holding it. The steps run with no registry
    /// lock held, so they may look up or register other queues.
    pub fn configure_queue(
        &self,
        name: &str,
        configuration: SubscriberConfiguration<Queue>,
    ) -> Result<()> {
        let mut queue = self.take_unshared(name)?;

        let steps = configuration.len();
        configuration.apply(&mut queue);
        let validated = match queue.endpoint().circuit_breaker() {
            Some(parameters) => parameters.validate(),
            None => Ok(()),
        };
        self.queues.insert(name.to_string(), Arc::new(queue));
        validated?;

        debug!(queue = name, steps, "Configured queue");
        Ok(())
    }

    /// Take a queue out of the registry for reconfiguration, or start a new
    /// one. Only the registry may hold it.
    fn take_unshared(&self, name: &str) -> Result<Queue> {
        let Some((key, queue)) = self
            .queues
            .remove_if(name, |_, queue| Arc::strong_count(queue) == 1)
        else {
            if self.queues.contains_key(name) {
                return Err(TransportError::EndpointActive(name.to_string()));
            }
            return Ok(Queue::new(Arc::clone(&self.core), name));
        };

        Arc::try_unwrap(queue).map_err(|shared| {
            self.queues.insert(key, shared);
            TransportError::EndpointActive(name.to_string())
        })
    }

    /// The reply queue for a node: framework owned, exclusive to this
    /// connection and deleted by the broker when it closes.
    pub fn response_queue(&self, node_id: &str) -> Result<Arc<Queue>> {
        let name = format!("{}response.{}", self.core.options.system_queue_prefix, node_id);
        if let Some(queue) = self.find_queue(&name) {
            return Ok(queue);
        }
        self.configure_queue(
            &name,
            SubscriberConfiguration::new().configure(|queue: &mut Queue| {
                queue.endpoint_mut().set_role(EndpointRole::System);
                queue.set_durable(false);
                queue.set_exclusive(true);
                queue.set_auto_delete(true);
            }),
        )?;
        Ok(self.queue(&name))
    }

    /// Initialize every registered queue.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        for queue in self.queues() {
            queue.initialize().await?;
        }
        info!(queues = self.queues.len(), "Transport initialized");
        Ok(())
    }

    /// Start consuming the named queue.
    pub async fn build_listener(
        &self,
        name: &str,
        runtime: &BusRuntime,
        receiver: Arc<dyn Receiver>,
    ) -> Result<Listener> {
        let queue = self
            .find_queue(name)
            .ok_or_else(|| TransportError::UnknownQueue(name.to_string()))?;
        queue.build_listener(runtime, receiver).await
    }

    /// Purge every registered queue. Best effort.
    pub async fn purge_all(&self) {
        for queue in self.queues() {
            if queue.is_purgeable() {
                queue.purge().await;
            }
        }
    }

    /// Delete every registered queue that this node owns.
    pub async fn teardown_all(&self) -> Result<()> {
        for queue in self.queues() {
            queue.teardown().await?;
        }
        Ok(())
    }
}

impl Transport {
    /// The registered queue an envelope is addressed to.
    fn route(&self, envelope: &Envelope) -> std::result::Result<Arc<Queue>, SendError> {
        let destination = envelope
            .destination
            .as_ref()
            .ok_or(SendError::NoDestination(envelope.id))?;

        if destination.scheme() != self.core.options.scheme || !destination.is_queue() {
            return Err(SendError::UnsupportedDestination(destination.to_string()));
        }
        Ok(self.queue(destination.name()))
    }
}

#[async_trait]
impl EnvelopeSender for Transport {
    async fn send(&self, envelope: Envelope) -> std::result::Result<(), SendError> {
        self.route(&envelope)?.send(envelope).await?;
        Ok(())
    }

    /// Publishes the whole batch on one channel.
    async fn send_batch(&self, envelopes: &[Envelope]) -> std::result::Result<(), PartialSend> {
        if envelopes.is_empty() {
            return Ok(());
        }
        let mut channel = ChannelLease::acquire(self.core.broker.as_ref())
            .await
            .map_err(|e| PartialSend {
                sent: 0,
                error: SendError::Transport(e.into()),
            })?;

        for (sent, envelope) in envelopes.iter().enumerate() {
            let result = match self.route(envelope) {
                Ok(queue) => queue
                    .send_on(&mut *channel, envelope.clone())
                    .await
                    .map_err(SendError::from),
                Err(e) => Err(e),
            };
            if let Err(error) = result {
                return Err(PartialSend { sent, error });
            }
        }
        debug!(envelopes = envelopes.len(), "Sent batch");
        Ok(())
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();
        names.sort();
        f.debug_struct("Transport")
            .field("options", &self.core.options)
            .field("queues", &names)
            .finish()
    }
}
