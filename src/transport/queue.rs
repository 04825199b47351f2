use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::TransportCore;
use crate::broker::{BrokerChannel, ChannelLease, QueueDeclaration};
use crate::endpoint::{ConfigurableEndpoint, Endpoint, EndpointMode, EndpointRole, EndpointUri};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::listener::{Listener, Receiver};
use crate::runtime::BusRuntime;

/// Declaration argument holding the message time-to-live in milliseconds.
pub const MESSAGE_TTL_ARGUMENT: &str = "x-message-ttl";

/// Prefetch used when the endpoint mode does not buffer.
pub const DEFAULT_PREFETCH_COUNT: u16 = 100;

/// Where a queue is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueState {
    Unconfigured,
    Initialized,
    Declared,
    Active,
    TornDown,
}

/// A broker-backed endpoint.
///
/// Queue attributes are set through `&mut Queue`, which is only available
/// while the transport holds the only reference. Once a queue is shared with
/// a listener, its configuration is fixed; the declaration flag, the
/// initialization guard and the lifecycle state are the only mutable parts.
pub struct Queue {
    endpoint: Endpoint,
    transport: Arc<TransportCore>,
    queue_name: String,
    is_durable: bool,
    is_exclusive: bool,
    auto_delete: bool,
    arguments: HashMap<String, serde_json::Value>,
    purge_on_startup: bool,
    listener_count: usize,
    prefetch_size: u32,
    prefetch_count: Option<u16>,
    has_declared: AtomicBool,
    initialized: OnceCell<()>,
    state: Mutex<QueueState>,
}

impl Queue {
    pub(crate) fn new(transport: Arc<TransportCore>, queue_name: impl Into<String>) -> Self {
        let queue_name = queue_name.into();
        let uri = EndpointUri::queue(transport.options.scheme.clone(), queue_name.clone());
        Self {
            endpoint: Endpoint::new(uri, EndpointRole::Application),
            transport,
            queue_name,
            is_durable: true,
            is_exclusive: false,
            auto_delete: false,
            arguments: HashMap::new(),
            purge_on_startup: false,
            listener_count: 1,
            prefetch_size: 0,
            prefetch_count: None,
            has_declared: AtomicBool::new(false),
            initialized: OnceCell::new(),
            state: Mutex::new(QueueState::Unconfigured),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn uri(&self) -> &EndpointUri {
        self.endpoint.uri()
    }

    pub fn is_durable(&self) -> bool {
        self.is_durable
    }

    pub fn set_durable(&mut self, durable: bool) {
        self.is_durable = durable;
    }

    pub fn is_exclusive(&self) -> bool {
        self.is_exclusive
    }

    pub fn set_exclusive(&mut self, exclusive: bool) {
        self.is_exclusive = exclusive;
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn set_auto_delete(&mut self, auto_delete: bool) {
        self.auto_delete = auto_delete;
    }

    pub fn arguments(&self) -> &HashMap<String, serde_json::Value> {
        &self.arguments
    }

    /// Add a declaration argument, passed to the broker as is.
    pub fn set_argument(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.arguments.insert(key.into(), value);
    }

    /// Expire messages that sit in the queue longer than `ttl`.
    pub fn set_time_to_live(&mut self, ttl: Duration) {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self.set_argument(MESSAGE_TTL_ARGUMENT, serde_json::Value::from(millis));
    }

    pub fn purge_on_startup(&self) -> bool {
        self.purge_on_startup
    }

    pub fn set_purge_on_startup(&mut self, purge: bool) {
        self.purge_on_startup = purge;
    }

    pub fn listener_count(&self) -> usize {
        self.listener_count
    }

    /// Number of independent consumption loops. Values below one become one.
    pub fn set_listener_count(&mut self, count: usize) {
        self.listener_count = count.max(1);
    }

    pub fn prefetch_size(&self) -> u32 {
        self.prefetch_size
    }

    /// Upper bound on unacknowledged bytes per consumer; 0 is unlimited.
    pub fn set_prefetch_size(&mut self, bytes: u32) {
        self.prefetch_size = bytes;
    }

    pub fn prefetch_count(&self) -> Option<u16> {
        self.prefetch_count
    }

    pub fn set_prefetch_count(&mut self, count: u16) {
        self.prefetch_count = Some(count);
    }

    /// Prefetch count for each consumption loop: the explicit value when set,
    /// twice the parallelism for buffered modes, otherwise
    /// [`DEFAULT_PREFETCH_COUNT`].
    pub fn resolved_prefetch_count(&self, max_parallelism: usize) -> u16 {
        if let Some(count) = self.prefetch_count {
            return count;
        }
        match self.endpoint.mode() {
            EndpointMode::BufferedInMemory | EndpointMode::Durable => {
                u16::try_from(max_parallelism.saturating_mul(2)).unwrap_or(u16::MAX)
            }
            EndpointMode::Inline => DEFAULT_PREFETCH_COUNT,
        }
    }

    pub fn has_declared(&self) -> bool {
        self.has_declared.load(Ordering::Acquire)
    }

    pub fn state(&self) -> QueueState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: QueueState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if next > *state {
            *state = next;
        }
    }

    /// A queue owned by another node: reserved prefix, application role.
    /// Never declared, purged or deleted from here.
    pub fn is_system_queue(&self) -> bool {
        self.endpoint.role() == EndpointRole::Application
            && self
                .queue_name
                .starts_with(&self.transport.options.system_queue_prefix)
    }

    /// Only durable, shared, long-lived queues are purged; exclusive and
    /// auto-delete queues belong to a single connection.
    pub fn is_purgeable(&self) -> bool {
        self.is_durable && !self.is_exclusive && !self.auto_delete
    }

    pub fn declaration(&self) -> QueueDeclaration {
        QueueDeclaration {
            name: self.queue_name.clone(),
            durable: self.is_durable,
            exclusive: self.is_exclusive,
            auto_delete: self.auto_delete,
            arguments: self.arguments.clone(),
        }
    }

    /// Declare and purge as the transport options and this queue ask for.
    /// Runs once; later calls return immediately.
    pub async fn initialize(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| self.initialize_once())
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(queue = %self.queue_name))]
    async fn initialize_once(&self) -> Result<()> {
        if self.is_system_queue() {
            debug!("System queue, nothing to initialize");
            return Ok(());
        }

        let options = &self.transport.options;
        let purge = options.auto_purge_all_queues || self.purge_on_startup;
        if options.auto_provision || purge {
            let mut channel = ChannelLease::acquire(self.transport.broker.as_ref()).await?;
            if options.auto_provision {
                self.declare(&mut *channel).await?;
            }
            if purge && self.is_purgeable() {
                self.purge_with(&mut *channel).await;
            }
        }

        self.transition(QueueState::Initialized);
        Ok(())
    }

    /// Declare the queue on the broker, once.
    ///
    /// A broker reporting that the queue already exists with other arguments
    /// is not an error: the queue is there, just configured elsewhere.
    pub async fn declare(&self, channel: &mut dyn BrokerChannel) -> Result<()> {
        if self.has_declared() || self.is_system_queue() {
            return Ok(());
        }

        match channel.declare(&self.declaration()).await {
            Ok(()) => {
                info!(
                    queue = %self.queue_name,
                    durable = self.is_durable,
                    exclusive = self.is_exclusive,
                    auto_delete = self.auto_delete,
                    arguments = ?self.arguments,
                    "Declared queue"
                );
                self.has_declared.store(true, Ordering::Release);
                self.transition(QueueState::Declared);
                Ok(())
            }
            Err(e) if e.is_incompatible_declaration() => {
                debug!(queue = %self.queue_name, error = %e, "Queue exists with different arguments");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the queue exists. Errors count as absence.
    #[tracing::instrument(level = "debug", skip(self), fields(queue = %self.queue_name))]
    pub async fn check(&self) -> bool {
        if self.is_system_queue() {
            return true;
        }
        let mut channel = match ChannelLease::acquire(self.transport.broker.as_ref()).await {
            Ok(channel) => channel,
            Err(e) => {
                debug!(error = %e, "Could not open channel to check queue");
                return false;
            }
        };
        channel.declare_passive(&self.queue_name).await.is_ok()
    }

    /// Explicitly declare the queue.
    #[tracing::instrument(level = "debug", skip(self), fields(queue = %self.queue_name))]
    pub async fn setup(&self) -> Result<()> {
        if self.is_system_queue() {
            return Ok(());
        }
        let mut channel = ChannelLease::acquire(self.transport.broker.as_ref()).await?;
        self.declare(&mut *channel).await
    }

    /// Delete the queue. System, auto-delete and exclusive queues are left to
    /// their owner or to the broker.
    #[tracing::instrument(level = "debug", skip(self), fields(queue = %self.queue_name))]
    pub async fn teardown(&self) -> Result<()> {
        if self.is_system_queue() || self.auto_delete || self.is_exclusive {
            return Ok(());
        }
        let mut channel = ChannelLease::acquire(self.transport.broker.as_ref()).await?;
        channel.delete(&self.queue_name).await?;
        info!("Deleted queue");
        self.transition(QueueState::TornDown);
        Ok(())
    }

    /// Empty the queue. Best effort: failures are logged, never returned.
    #[tracing::instrument(level = "debug", skip(self), fields(queue = %self.queue_name))]
    pub async fn purge(&self) {
        if self.is_system_queue() {
            return;
        }
        match ChannelLease::acquire(self.transport.broker.as_ref()).await {
            Ok(mut channel) => self.purge_with(&mut *channel).await,
            Err(e) => warn!(error = %e, "Could not open channel to purge queue"),
        }
    }

    async fn purge_with(&self, channel: &mut dyn BrokerChannel) {
        match channel.purge(&self.queue_name).await {
            Ok(count) => info!(queue = %self.queue_name, count, "Purged queue"),
            Err(e) => warn!(queue = %self.queue_name, error = %e, "Failed to purge queue"),
        }
    }

    /// Diagnostic attributes: `name` and the current message `count`.
    pub async fn attributes(&self) -> Result<BTreeMap<String, String>> {
        let mut channel = ChannelLease::acquire(self.transport.broker.as_ref()).await?;
        let count = channel.message_count(&self.queue_name).await?;

        let mut attributes = BTreeMap::new();
        attributes.insert("name".to_string(), self.queue_name.clone());
        attributes.insert("count".to_string(), count.to_string());
        Ok(attributes)
    }

    /// Prepare and publish an envelope to this queue.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        let mut channel = ChannelLease::acquire(self.transport.broker.as_ref()).await?;
        self.send_on(&mut *channel, envelope).await
    }

    /// Prepare and publish an envelope on a channel the caller already holds.
    pub(crate) async fn send_on(
        &self,
        channel: &mut dyn BrokerChannel,
        mut envelope: Envelope,
    ) -> Result<()> {
        self.endpoint.prepare_outgoing(&mut envelope)?;
        channel.publish(&self.queue_name, envelope).await?;
        Ok(())
    }

    /// Initialize the queue and start consuming it.
    ///
    /// A listener count of one gives a single consumer; more gives a parallel
    /// listener with one channel and prefetch window per consumer.
    pub async fn build_listener(
        self: &Arc<Self>,
        runtime: &BusRuntime,
        receiver: Arc<dyn Receiver>,
    ) -> Result<Listener> {
        self.initialize().await?;
        self.transition(QueueState::Active);
        Ok(Listener::start(Arc::clone(self), runtime, receiver))
    }

    pub(crate) fn broker(&self) -> &dyn crate::broker::Broker {
        self.transport.broker.as_ref()
    }
}

impl ConfigurableEndpoint for Queue {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn endpoint_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("queue_name", &self.queue_name)
            .field("endpoint", &self.endpoint)
            .field("is_durable", &self.is_durable)
            .field("is_exclusive", &self.is_exclusive)
            .field("auto_delete", &self.auto_delete)
            .field("arguments", &self.arguments)
            .field("listener_count", &self.listener_count)
            .field("prefetch_size", &self.prefetch_size)
            .field("prefetch_count", &self.prefetch_count)
            .field("has_declared", &self.has_declared())
            .field("state", &self.state())
            .finish()
    }
}
