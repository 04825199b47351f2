//! In-memory broker for testing and single-process scenarios.
//!
//! This module provides a thread-safe in-process broker that implements the
//! [`Broker`] contract, useful for:
//! - Unit and integration testing without a running message broker
//! - Single-process applications
//! - Development and prototyping
//!
//! It keeps call counters for every primitive and supports fault injection,
//! so tests can assert exactly which broker round trips an operation made.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::channel::{Broker, BrokerChannel, QueueDeclaration};
use super::error::BrokerError;
use crate::envelope::{Delivery, Envelope};

/// Number of calls made against each broker primitive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BrokerCalls {
    pub channels_opened: usize,
    pub channels_closed: usize,
    pub declare: usize,
    pub declare_passive: usize,
    pub purge: usize,
    pub delete: usize,
    pub message_count: usize,
    pub qos: usize,
    pub publish: usize,
    pub ack: usize,
    pub nack: usize,
}

impl BrokerCalls {
    /// Calls against the administrative primitives.
    pub fn admin(&self) -> usize {
        self.declare + self.declare_passive + self.purge + self.delete + self.message_count
    }
}

/// In-memory broker.
///
/// Features:
/// - Thread-safe (can be shared across tasks via `Clone`)
/// - Per-channel prefetch windows by count and by bytes
/// - Ack / nack with requeue, and requeue of unacked deliveries on channel close
/// - Declaration compatibility checks like a real broker
///
/// ## Example
///
/// ```
/// use durable_bus::broker::{Broker, BrokerChannel, InMemoryBroker, QueueDeclaration};
/// use durable_bus::Envelope;
///
/// # tokio_test_block(async {
/// let broker = InMemoryBroker::new();
/// let mut channel = broker.open_channel().await.unwrap();
/// channel.declare(&QueueDeclaration {
///     name: "orders".into(),
///     durable: true,
///     exclusive: false,
///     auto_delete: false,
///     arguments: Default::default(),
/// }).await.unwrap();
///
/// channel.publish("orders", Envelope::new("OrderPlaced", serde_json::json!({}))).await.unwrap();
/// assert_eq!(channel.message_count("orders").await.unwrap(), 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    channels: HashMap<u64, ChannelState>,
    unacked: HashMap<u64, Unacked>,
    next_channel: u64,
    next_tag: u64,
    faults: Faults,
    calls: BrokerCalls,
}

struct QueueState {
    declaration: QueueDeclaration,
    ready: VecDeque<(Envelope, bool)>,
}

#[derive(Default)]
struct ChannelState {
    prefetch_size: u32,
    prefetch_count: u16,
    unacked_count: usize,
    unacked_bytes: usize,
}

struct Unacked {
    channel: u64,
    queue: String,
    envelope: Envelope,
}

#[derive(Default)]
struct Faults {
    failing_opens: u32,
    failing_publishes: u32,
    conflicting: HashSet<String>,
    failing_declares: HashSet<String>,
    failing_purges: HashSet<String>,
}

impl InMemoryBroker {
    /// Create a new in-memory broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the call counters.
    pub fn calls(&self) -> BrokerCalls {
        self.state().calls.clone()
    }

    /// Names of all declared queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state().queues.contains_key(name)
    }

    /// The declaration a queue was created with.
    pub fn declaration(&self, name: &str) -> Option<QueueDeclaration> {
        self.state()
            .queues
            .get(name)
            .map(|q| q.declaration.clone())
    }

    /// Envelopes waiting in a queue, in delivery order.
    pub fn ready(&self, name: &str) -> Vec<Envelope> {
        self.state()
            .queues
            .get(name)
            .map(|q| q.ready.iter().map(|(e, _)| e.clone()).collect())
            .unwrap_or_default()
    }

    pub fn ready_count(&self, name: &str) -> usize {
        self.state().queues.get(name).map_or(0, |q| q.ready.len())
    }

    /// Deliveries handed out and not yet acked or nacked, across all channels.
    pub fn unacked_count(&self) -> usize {
        self.state().unacked.len()
    }

    pub fn open_channels(&self) -> usize {
        self.state().channels.len()
    }

    /// Put an envelope straight onto a declared queue, bypassing channels and
    /// call counters.
    pub fn push(&self, queue: &str, envelope: Envelope) -> Result<(), BrokerError> {
        {
            let mut state = self.state();
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::NotFound(queue.to_string()))?;
            queue_state.ready.push_back((envelope, false));
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Make the next `count` channel opens fail with a connection error.
    pub fn fail_next_opens(&self, count: u32) {
        self.state().faults.failing_opens = count;
    }

    /// Make the next `count` publishes fail with a connection error.
    pub fn fail_next_publishes(&self, count: u32) {
        self.state().faults.failing_publishes = count;
    }

    /// Report every declaration of `queue` as incompatible with an existing one.
    pub fn conflict_declarations_of(&self, queue: &str) {
        self.state().faults.conflicting.insert(queue.to_string());
    }

    /// Fail every declaration of `queue` with a non-benign error.
    pub fn fail_declarations_of(&self, queue: &str) {
        self.state().faults.failing_declares.insert(queue.to_string());
    }

    pub fn fail_purges_of(&self, queue: &str) {
        self.state().faults.failing_purges.insert(queue.to_string());
    }

    fn register_channel(&self) -> Result<u64, BrokerError> {
        let mut state = self.state();
        state.calls.channels_opened += 1;
        if state.faults.failing_opens > 0 {
            state.faults.failing_opens -= 1;
            return Err(BrokerError::ConnectionFailed(
                "connection refused".to_string(),
            ));
        }
        state.next_channel += 1;
        let id = state.next_channel;
        state.channels.insert(id, ChannelState::default());
        Ok(id)
    }

    fn release_channel(&self, id: u64) {
        {
            let mut state = self.state();
            let state = &mut *state;
            state.calls.channels_closed += 1;
            state.channels.remove(&id);

            let mut tags: Vec<u64> = state
                .unacked
                .iter()
                .filter(|(_, u)| u.channel == id)
                .map(|(tag, _)| *tag)
                .collect();
            // Push back newest first so the original order is restored.
            tags.sort_unstable_by(|a, b| b.cmp(a));
            for tag in tags {
                if let Some(unacked) = state.unacked.remove(&tag) {
                    if let Some(queue) = state.queues.get_mut(&unacked.queue) {
                        queue.ready.push_front((unacked.envelope, true));
                    }
                }
            }
        }
        self.inner.notify.notify_waiters();
    }

    fn try_deliver(&self, channel: u64, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut guard = self.state();
        let state = &mut *guard;

        let window = state
            .channels
            .get_mut(&channel)
            .ok_or(BrokerError::ChannelClosed)?;
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(queue.to_string()))?;

        if window.prefetch_count > 0 && window.unacked_count >= window.prefetch_count as usize {
            return Ok(None);
        }

        let next_size = match queue_state.ready.front() {
            Some((envelope, _)) => envelope.size(),
            None => return Ok(None),
        };
        if window.prefetch_size > 0
            && window.unacked_count > 0
            && window.unacked_bytes + next_size > window.prefetch_size as usize
        {
            return Ok(None);
        }

        let Some((mut envelope, redelivered)) = queue_state.ready.pop_front() else {
            return Ok(None);
        };
        envelope.attempts += 1;

        state.next_tag += 1;
        let tag = state.next_tag;
        window.unacked_count += 1;
        window.unacked_bytes += next_size;
        state.unacked.insert(
            tag,
            Unacked {
                channel,
                queue: queue.to_string(),
                envelope: envelope.clone(),
            },
        );

        Ok(Some(Delivery {
            tag,
            envelope,
            redelivered,
        }))
    }

    fn settle(&self, channel: u64, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        {
            let mut guard = self.state();
            let state = &mut *guard;
            let owned = state
                .unacked
                .get(&tag)
                .map_or(false, |u| u.channel == channel);
            if !owned {
                return Err(BrokerError::UnknownDeliveryTag(tag));
            }
            let unacked = state
                .unacked
                .remove(&tag)
                .ok_or(BrokerError::UnknownDeliveryTag(tag))?;

            if let Some(window) = state.channels.get_mut(&channel) {
                window.unacked_count = window.unacked_count.saturating_sub(1);
                window.unacked_bytes = window.unacked_bytes.saturating_sub(unacked.envelope.size());
            }
            if requeue {
                if let Some(queue) = state.queues.get_mut(&unacked.queue) {
                    queue.ready.push_front((unacked.envelope, true));
                }
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let id = self.register_channel()?;
        Ok(Box::new(InMemoryChannel {
            id,
            broker: self.clone(),
            closed: false,
        }))
    }
}

/// A channel on an [`InMemoryBroker`].
pub struct InMemoryChannel {
    id: u64,
    broker: InMemoryBroker,
    closed: bool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed {
            Err(BrokerError::ChannelClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare(&mut self, declaration: &QueueDeclaration) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        state.calls.declare += 1;

        if state.faults.failing_declares.contains(&declaration.name) {
            return Err(BrokerError::Other(format!(
                "access refused to queue {}",
                declaration.name
            )));
        }
        if state.faults.conflicting.contains(&declaration.name) {
            return Err(BrokerError::IncompatibleDeclaration {
                queue: declaration.name.clone(),
                reason: "declared elsewhere with different arguments".to_string(),
            });
        }

        if let Some(existing) = state.queues.get(&declaration.name) {
            if existing.declaration != *declaration {
                return Err(BrokerError::IncompatibleDeclaration {
                    queue: declaration.name.clone(),
                    reason: format!(
                        "existing durable={} exclusive={} auto_delete={}",
                        existing.declaration.durable,
                        existing.declaration.exclusive,
                        existing.declaration.auto_delete
                    ),
                });
            }
            return Ok(());
        }

        state.queues.insert(
            declaration.name.clone(),
            QueueState {
                declaration: declaration.clone(),
                ready: VecDeque::new(),
            },
        );
        Ok(())
    }

    async fn declare_passive(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        state.calls.declare_passive += 1;
        if state.queues.contains_key(queue) {
            Ok(())
        } else {
            Err(BrokerError::NotFound(queue.to_string()))
        }
    }

    async fn purge(&mut self, queue: &str) -> Result<u32, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        state.calls.purge += 1;
        if state.faults.failing_purges.contains(queue) {
            return Err(BrokerError::Other(format!("purge of {} refused", queue)));
        }
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(queue.to_string()))?;
        let purged = queue_state.ready.len() as u32;
        queue_state.ready.clear();
        Ok(purged)
    }

    async fn delete(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        {
            let mut guard = self.broker.state();
            let state = &mut *guard;
            state.calls.delete += 1;
            state.queues.remove(queue);

            let tags: Vec<u64> = state
                .unacked
                .iter()
                .filter(|(_, u)| u.queue == queue)
                .map(|(tag, _)| *tag)
                .collect();
            for tag in tags {
                if let Some(unacked) = state.unacked.remove(&tag) {
                    if let Some(window) = state.channels.get_mut(&unacked.channel) {
                        window.unacked_count = window.unacked_count.saturating_sub(1);
                        window.unacked_bytes =
                            window.unacked_bytes.saturating_sub(unacked.envelope.size());
                    }
                }
            }
        }
        self.broker.inner.notify.notify_waiters();
        Ok(())
    }

    async fn message_count(&mut self, queue: &str) -> Result<u32, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        state.calls.message_count += 1;
        state
            .queues
            .get(queue)
            .map(|q| q.ready.len() as u32)
            .ok_or_else(|| BrokerError::NotFound(queue.to_string()))
    }

    async fn qos(&mut self, prefetch_size: u32, prefetch_count: u16) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        state.calls.qos += 1;
        let window = state
            .channels
            .get_mut(&self.id)
            .ok_or(BrokerError::ChannelClosed)?;
        window.prefetch_size = prefetch_size;
        window.prefetch_count = prefetch_count;
        Ok(())
    }

    async fn publish(&mut self, queue: &str, envelope: Envelope) -> Result<(), BrokerError> {
        self.ensure_open()?;
        {
            let mut state = self.broker.state();
            state.calls.publish += 1;
            if state.faults.failing_publishes > 0 {
                state.faults.failing_publishes -= 1;
                return Err(BrokerError::ConnectionFailed(
                    "connection reset by peer".to_string(),
                ));
            }
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::NotFound(queue.to_string()))?;
            queue_state.ready.push_back((envelope, false));
        }
        self.broker.inner.notify.notify_waiters();
        Ok(())
    }

    async fn next_delivery(&mut self, queue: &str) -> Result<Delivery, BrokerError> {
        self.ensure_open()?;
        let inner = Arc::clone(&self.broker.inner);
        loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before looking, so a publish in between is not missed.
            notified.as_mut().enable();

            if let Some(delivery) = self.broker.try_deliver(self.id, queue)? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.state().calls.ack += 1;
        self.broker.settle(self.id, tag, false)
    }

    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.state().calls.nack += 1;
        self.broker.settle(self.id, tag, requeue)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.broker.release_channel(self.id);
        }
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}
