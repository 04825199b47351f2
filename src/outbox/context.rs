use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::sender::{EnvelopeSender, PartialSend, SendError};
use super::unit_of_work::{UnitOfWork, UnitOfWorkError};
use crate::endpoint::EndpointUri;
use crate::envelope::Envelope;
use crate::serializer::SerializationError;

/// Retry policy for handing pending envelopes to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushPolicy {
    /// Attempts per envelope, including the first. Only transient failures
    /// are retried.
    pub max_attempts: u32,
    /// Wait between attempts.
    pub backoff: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl FlushPolicy {
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Result of a successful flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Envelopes handed to the sender.
    pub dispatched: usize,
    /// Send attempts made, retries included.
    pub attempts: usize,
}

#[derive(Error, Debug)]
pub enum OutboxError {
    /// The unit of work failed to commit. Nothing was sent.
    #[error("commit failed, outgoing envelopes discarded: {0}")]
    Commit(#[source] UnitOfWorkError),

    /// A send failed after the commit. Unsent envelopes are still pending.
    #[error("flush stopped after {dispatched} envelope(s), {remaining} pending: {source}")]
    Flush {
        dispatched: usize,
        remaining: usize,
        #[source]
        source: SendError,
    },

    #[error("message context already completed")]
    AlreadyCompleted,
}

/// Outgoing envelopes produced while handling one message or request.
///
/// Nothing is sent while the handler runs. [`MessageContext::complete`]
/// commits the enlisted unit of work and then always flushes, whether or not
/// the commit changed anything. A failed commit discards the envelopes.
pub struct MessageContext {
    sender: Arc<dyn EnvelopeSender>,
    owner: Option<Box<dyn UnitOfWork>>,
    pending: VecDeque<Envelope>,
    policy: FlushPolicy,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    completed: bool,
}

impl MessageContext {
    pub fn new(sender: Arc<dyn EnvelopeSender>) -> Self {
        Self {
            sender,
            owner: None,
            pending: VecDeque::new(),
            policy: FlushPolicy::default(),
            correlation_id: None,
            causation_id: None,
            completed: false,
        }
    }

    /// A context for handling `incoming`. Outgoing envelopes inherit its
    /// correlation id and name it as their cause.
    pub fn for_incoming(sender: Arc<dyn EnvelopeSender>, incoming: &Envelope) -> Self {
        let mut context = Self::new(sender);
        context.correlation_id = Some(
            incoming
                .correlation_id()
                .map_or_else(|| incoming.id.to_string(), str::to_string),
        );
        context.causation_id = Some(incoming.id.to_string());
        context
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach the unit of work whose commit gates sending.
    pub fn enlist(&mut self, unit_of_work: Box<dyn UnitOfWork>) {
        self.owner = Some(unit_of_work);
    }

    pub fn is_enlisted(&self) -> bool {
        self.owner.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Queue an envelope for sending after commit.
    pub fn send(&mut self, mut envelope: Envelope) {
        if envelope.correlation_id().is_none() {
            if let Some(id) = &self.correlation_id {
                envelope.set_correlation_id(id.clone());
            }
        }
        if envelope.causation_id().is_none() {
            if let Some(id) = &self.causation_id {
                envelope.set_causation_id(id.clone());
            }
        }
        self.pending.push_back(envelope);
    }

    /// Queue a message for `destination`.
    pub fn send_to<T: Serialize + 'static>(
        &mut self,
        destination: EndpointUri,
        message: &T,
    ) -> Result<(), SerializationError> {
        let envelope = Envelope::for_message(message)?.to(destination);
        self.send(envelope);
        Ok(())
    }

    pub fn pending(&self) -> impl Iterator<Item = &Envelope> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Commit the enlisted unit of work, then flush.
    ///
    /// The flush runs after every successful commit, including one that
    /// reports no changes. Can be called once; if the flush fails, retry it
    /// with [`MessageContext::flush_outgoing`].
    pub async fn complete(&mut self) -> Result<FlushReport, OutboxError> {
        if self.completed {
            return Err(OutboxError::AlreadyCompleted);
        }
        self.completed = true;

        if let Some(owner) = self.owner.as_mut() {
            match owner.commit().await {
                Ok(outcome) if outcome.is_empty() => {
                    debug!("Unit of work committed without changes, flushing anyway")
                }
                Ok(outcome) => debug!(changes = outcome.changes, "Unit of work committed"),
                Err(e) => {
                    let discarded = self.pending.len();
                    self.pending.clear();
                    warn!(discarded, error = %e, "Commit failed, outgoing envelopes discarded");
                    return Err(OutboxError::Commit(e));
                }
            }
        }

        self.flush_outgoing().await
    }

    /// Hand every pending envelope to the sender, in order, as one batch.
    ///
    /// An envelope leaves the pending set only once the sender accepted it.
    /// Transient failures are retried per the [`FlushPolicy`], counting
    /// attempts against the envelope that failed; any other failure stops the
    /// flush with the rest still pending.
    pub async fn flush_outgoing(&mut self) -> Result<FlushReport, OutboxError> {
        let mut report = FlushReport::default();
        let mut failures = 0;

        while !self.pending.is_empty() {
            let (sent, failure) = match self
                .sender
                .send_batch(self.pending.make_contiguous())
                .await
            {
                Ok(()) => (self.pending.len(), None),
                Err(PartialSend { sent, error }) => (sent, Some(error)),
            };
            self.pending.drain(..sent);
            report.dispatched += sent;
            report.attempts += sent + usize::from(failure.is_some());

            let Some(e) = failure else {
                break;
            };
            if sent > 0 {
                failures = 0;
            }
            failures += 1;

            let envelope = self.pending.front().map(|e| e.id);
            if e.is_transient() && failures < self.policy.max_attempts {
                warn!(envelope = ?envelope, attempt = failures, error = %e, "Send failed, retrying");
                tokio::time::sleep(self.policy.backoff).await;
                continue;
            }
            error!(envelope = ?envelope, attempt = failures, error = %e, "Flush failed");
            return Err(OutboxError::Flush {
                dispatched: report.dispatched,
                remaining: self.pending.len(),
                source: e,
            });
        }

        if report.dispatched > 0 {
            debug!(dispatched = report.dispatched, attempts = report.attempts, "Flushed outgoing envelopes");
        }
        Ok(report)
    }
}

impl Drop for MessageContext {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "Message context dropped with unsent envelopes");
        }
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("enlisted", &self.owner.is_some())
            .field("pending", &self.pending.len())
            .field("policy", &self.policy)
            .field("correlation_id", &self.correlation_id)
            .field("completed", &self.completed)
            .finish()
    }
}
