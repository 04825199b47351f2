use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use super::receiver::{ListenerStats, ReceiveError, Receiver};
use crate::broker::{BrokerChannel, BrokerError, ChannelLease};
use crate::circuit_breaker::CircuitBreaker;
use crate::endpoint::{ConfigurableEndpoint, EndpointMode};
use crate::envelope::Delivery;
use crate::transport::Queue;

/// Everything one consumption loop needs, shared by the loops of a listener.
#[derive(Clone)]
pub(crate) struct ConsumerSettings {
    pub(crate) queue: Arc<Queue>,
    pub(crate) receiver: Arc<dyn Receiver>,
    pub(crate) breaker: Option<Arc<dyn CircuitBreaker>>,
    pub(crate) pause_time: Duration,
    pub(crate) prefetch_count: u16,
    /// Deliveries a loop may hold unsettled: the one being handled plus those
    /// buffered behind it.
    pub(crate) buffer_capacity: usize,
    pub(crate) retry_delay: Duration,
}

impl ConsumerSettings {
    /// Buffered modes read ahead up to the prefetch window. Inline handles
    /// straight off the channel, one delivery at a time.
    pub(crate) fn capacity_for(mode: EndpointMode, prefetch_count: u16) -> usize {
        match (mode.is_buffered(), prefetch_count) {
            (false, _) => 1,
            (true, 0) => usize::MAX,
            (true, count) => usize::from(count),
        }
    }
}

/// One consumption loop on its own broker channel.
///
/// Dropping the loop signals it to stop; call [`ConsumerLoop::stop`] to also
/// wait for it and collect its stats.
pub struct ConsumerLoop {
    id: usize,
    token: CancellationToken,
    handle: Option<JoinHandle<ListenerStats>>,
}

impl ConsumerLoop {
    pub(crate) fn spawn(id: usize, settings: ConsumerSettings, token: CancellationToken) -> Self {
        let span = info_span!("consumer", queue = %settings.queue.queue_name(), consumer = id);
        let handle = tokio::spawn(run(settings, token.clone()).instrument(span));
        Self {
            id,
            token,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Stop the loop and wait for it to finish. A message being handled is
    /// finished and settled first; buffered deliveries go back to the queue.
    pub async fn stop(mut self) -> ListenerStats {
        self.token.cancel();
        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(stats) => stats,
                Err(e) => {
                    error!(consumer = self.id, error = %e, "Consumer task failed");
                    ListenerStats::default()
                }
            },
            None => ListenerStats::default(),
        }
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&self) {
        self.token.cancel();
    }
}

impl Drop for ConsumerLoop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for ConsumerLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerLoop")
            .field("id", &self.id)
            .field("stopping", &self.token.is_cancelled())
            .finish()
    }
}

/// How a delivery should be settled once its handling is over.
enum Outcome {
    Handled,
    Failed(ReceiveError),
    Unreadable,
}

struct Settlement {
    tag: u64,
    envelope_id: Uuid,
    redelivered: bool,
    outcome: Outcome,
}

type InFlight<'a> = Pin<Box<dyn Future<Output = Settlement> + Send + 'a>>;

async fn run(settings: ConsumerSettings, token: CancellationToken) -> ListenerStats {
    let mut stats = ListenerStats::default();
    let queue_name = settings.queue.queue_name().to_string();

    'connect: while !token.is_cancelled() {
        let mut channel = match open(&settings).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(error = %e, "Could not open consumer channel");
                if pause(&token, settings.retry_delay).await {
                    break;
                }
                continue;
            }
        };
        debug!(
            prefetch = settings.prefetch_count,
            buffer = settings.buffer_capacity,
            "Consuming"
        );

        // Read-ahead deliveries, settled in order once handled. Anything left
        // here when the channel closes is requeued by the broker.
        let mut buffered: VecDeque<Delivery> = VecDeque::new();
        let mut in_flight: Option<InFlight<'_>> = None;

        loop {
            if in_flight.is_none() {
                if let Some(breaker) = &settings.breaker {
                    if breaker.is_open() {
                        debug!(pause = ?settings.pause_time, "Circuit open, pausing");
                        if pause(&token, settings.pause_time).await {
                            break 'connect;
                        }
                        continue;
                    }
                }
                if let Some(delivery) = buffered.pop_front() {
                    in_flight = Some(Box::pin(process(&settings, delivery)));
                }
            }

            let held = buffered.len() + usize::from(in_flight.is_some());
            let can_pull = held < settings.buffer_capacity;

            let step = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    if let Some(current) = in_flight.take() {
                        let settlement = current.await;
                        if let Err(e) = settle(&settings, &mut *channel, settlement, &mut stats).await {
                            warn!(error = %e, "Could not settle last delivery");
                        }
                    }
                    break 'connect;
                }
                settlement = poll_in_flight(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    settle(&settings, &mut *channel, settlement, &mut stats).await
                }
                delivery = channel.next_delivery(&queue_name), if can_pull => {
                    delivery.map(|delivery| buffered.push_back(delivery))
                }
            };

            if let Err(e) = step {
                warn!(error = %e, "Consumer channel failed, reconnecting");
                if pause(&token, settings.retry_delay).await {
                    break 'connect;
                }
                continue 'connect;
            }
        }
    }

    debug!(?stats, "Consumer stopped");
    stats
}

async fn poll_in_flight(in_flight: &mut Option<InFlight<'_>>) -> Settlement {
    match in_flight {
        Some(current) => current.await,
        None => std::future::pending::<Settlement>().await,
    }
}

async fn open(settings: &ConsumerSettings) -> Result<ChannelLease, BrokerError> {
    let mut channel = ChannelLease::acquire(settings.queue.broker()).await?;
    channel
        .qos(settings.queue.prefetch_size(), settings.prefetch_count)
        .await?;
    Ok(channel)
}

/// Decode a delivery and hand it to the receiver. Touches no channel, so the
/// loop can keep reading ahead meanwhile.
async fn process(settings: &ConsumerSettings, delivery: Delivery) -> Settlement {
    let Delivery {
        tag,
        mut envelope,
        redelivered,
    } = delivery;
    let envelope_id = envelope.id;

    let outcome = match settings.queue.endpoint().read_incoming(&mut envelope) {
        Err(e) => {
            warn!(envelope = %envelope_id, error = %e, "Dropping unreadable envelope");
            Outcome::Unreadable
        }
        Ok(()) => match settings.receiver.receive(envelope).await {
            Ok(()) => Outcome::Handled,
            Err(e) => Outcome::Failed(e),
        },
    };

    Settlement {
        tag,
        envelope_id,
        redelivered,
        outcome,
    }
}

async fn settle(
    settings: &ConsumerSettings,
    channel: &mut dyn BrokerChannel,
    settlement: Settlement,
    stats: &mut ListenerStats,
) -> Result<(), BrokerError> {
    let Settlement {
        tag,
        envelope_id,
        redelivered,
        outcome,
    } = settlement;
    stats.received += 1;

    match outcome {
        Outcome::Unreadable => {
            channel.nack(tag, false).await?;
            stats.rejected += 1;
        }
        Outcome::Handled => {
            channel.ack(tag).await?;
            stats.handled += 1;
            if let Some(breaker) = &settings.breaker {
                breaker.record_success();
            }
        }
        Outcome::Failed(e) => {
            match &e {
                ReceiveError::Retry(_) => {
                    debug!(envelope = %envelope_id, redelivered, error = %e, "Requeueing envelope");
                    stats.failed += 1;
                }
                ReceiveError::Reject(_) => {
                    warn!(envelope = %envelope_id, error = %e, "Envelope rejected");
                    stats.rejected += 1;
                }
            }
            channel.nack(tag, e.requeues()).await?;
            if let Some(breaker) = &settings.breaker {
                breaker.record_failure();
            }
        }
    }
    Ok(())
}

/// Sleep for `duration` unless cancelled first. Returns true when cancelled.
async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
