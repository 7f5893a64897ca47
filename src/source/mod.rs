//! Event sources: upstream feeds of serialized envelopes.
//!
//! A source yields raw envelope bytes. [`run_event_source`] pulls from a
//! source until it is exhausted or cancelled, handing every envelope to
//! an [`Ingress`], which routes it here or publishes it to the relay.
//! Delivery is at-least-once and unordered across upstream partitions;
//! the hub adds no ordering of its own.

pub mod channel;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "redis")]
pub mod redis;
pub mod relay;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::domain::{DeliveryReport, EventRouter};
use crate::error::HubError;

pub use channel::ChannelEventSource;
#[cfg(feature = "kafka")]
pub use kafka::KafkaEventSource;
#[cfg(feature = "redis")]
pub use self::redis::{RedisEventSource, RedisRelay};
pub use relay::{ChannelRelay, EventRelay, Ingress, RELAY_CHANNEL, Submitted};

/// Pause after a failed receive before asking the source again.
pub const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Errors raised by an event source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source could not be created or subscribed.
    #[error("event source connection failed: {0}")]
    Connection(String),

    /// A receive attempt failed. The source stays usable.
    #[error("event source receive failed: {0}")]
    Receive(String),
}

/// A feed of raw serialized envelopes.
#[async_trait]
pub trait EventSource: Send {
    /// Waits for the next envelope. `None` means the source is exhausted.
    async fn next_event(&mut self) -> Option<Result<Bytes, SourceError>>;
}

/// Totals for one run of [`run_event_source`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Envelopes received from the source.
    pub received: u64,
    /// Envelopes discarded because they did not decode.
    pub malformed: u64,
    /// Envelopes handed to the relay.
    pub relayed: u64,
    /// Envelopes lost because the relay rejected them.
    pub relay_failures: u64,
    /// Failed receive attempts.
    pub source_errors: u64,
    /// Enqueue tally across all routed envelopes.
    pub delivery: DeliveryReport,
}

/// Submits envelopes from `source` to `ingress` until the source is
/// exhausted or `cancel` fires.
///
/// Malformed envelopes, relay failures and receive errors are logged and
/// skipped.
pub async fn run_event_source<S>(
    mut source: S,
    ingress: Ingress,
    cancel: CancellationToken,
) -> ConsumerStats
where
    S: EventSource,
{
    let mut stats = ConsumerStats::default();
    tracing::info!("event source started");

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = source.next_event() => next,
        };

        match next {
            None => {
                tracing::info!("event source exhausted");
                break;
            }
            Some(Ok(raw)) => {
                stats.received += 1;
                match ingress.submit(raw).await {
                    Ok(Submitted::Routed(report)) => stats.delivery.merge(report.delivery),
                    Ok(Submitted::Relayed) => stats.relayed += 1,
                    Err(err @ HubError::MalformedEnvelope(_)) => {
                        stats.malformed += 1;
                        tracing::warn!(error = %err, "discarding envelope");
                    }
                    Err(err) => {
                        stats.relay_failures += 1;
                        tracing::warn!(error = %err, "envelope lost");
                    }
                }
            }
            Some(Err(err)) => {
                stats.source_errors += 1;
                tracing::warn!(error = %err, "event source error");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }

    tracing::info!(
        received = stats.received,
        malformed = stats.malformed,
        relayed = stats.relayed,
        source_errors = stats.source_errors,
        enqueued = stats.delivery.enqueued,
        "event source stopped"
    );
    stats
}

/// Sources and ingress wired from configuration.
#[derive(Debug)]
pub struct Started {
    /// Ingress for HTTP handlers: relayed when a relay is configured.
    pub ingress: Ingress,
    /// Consumer tasks, each yielding its totals once stopped.
    pub consumers: Vec<JoinHandle<ConsumerStats>>,
}

/// Starts the relay and the event source described by `config`.
///
/// With `REDIS_URL` set, a relay subscriber routing into `router` is
/// spawned and the returned ingress publishes to the relay. Settings for a
/// backend the binary was built without are logged and ignored.
///
/// # Errors
///
/// Returns [`SourceError::Connection`] if a configured backend cannot be
/// reached or subscribed.
pub async fn start_configured(
    config: &HubConfig,
    router: EventRouter,
    cancel: CancellationToken,
) -> Result<Started, SourceError> {
    let mut consumers = Vec::new();
    let ingress = start_relay(config, router, &cancel, &mut consumers).await?;

    if !config.event_source_enabled() {
        tracing::info!("no event source configured");
        return Ok(Started { ingress, consumers });
    }

    #[cfg(feature = "kafka")]
    {
        let source = KafkaEventSource::connect(
            &config.kafka_brokers,
            &config.kafka_group_id,
            &config.kafka_topics,
        )?;
        consumers.push(tokio::spawn(run_event_source(
            source,
            ingress.clone(),
            cancel,
        )));
    }

    #[cfg(not(feature = "kafka"))]
    {
        drop(cancel);
        tracing::warn!(
            topics = ?config.kafka_topics,
            "kafka topics configured but the kafka feature is disabled; not consuming"
        );
    }

    Ok(Started { ingress, consumers })
}

#[cfg(feature = "redis")]
async fn start_relay(
    config: &HubConfig,
    router: EventRouter,
    cancel: &CancellationToken,
    consumers: &mut Vec<JoinHandle<ConsumerStats>>,
) -> Result<Ingress, SourceError> {
    let Some(url) = config.redis_url.as_deref() else {
        return Ok(Ingress::local(router));
    };
    let relay = RedisRelay::connect(url).await?;
    let subscription = RedisEventSource::subscribe(url).await?;
    consumers.push(tokio::spawn(run_event_source(
        subscription,
        Ingress::local(router.clone()),
        cancel.clone(),
    )));
    Ok(Ingress::relayed(router, std::sync::Arc::new(relay)))
}

#[cfg(not(feature = "redis"))]
async fn start_relay(
    config: &HubConfig,
    router: EventRouter,
    _cancel: &CancellationToken,
    _consumers: &mut Vec<JoinHandle<ConsumerStats>>,
) -> Result<Ingress, SourceError> {
    if config.relay_enabled() {
        tracing::warn!("REDIS_URL set but the redis feature is disabled; routing locally");
    }
    Ok(Ingress::local(router))
}
