//! Kafka consumer-group event source.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;

use super::{EventSource, SourceError};

/// Consumes envelopes from Kafka topics as part of a consumer group.
///
/// Offsets start at the earliest record for a new group and are committed
/// automatically, so a restart may replay recent envelopes.
pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topics: Vec<String>,
}

impl fmt::Debug for KafkaEventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaEventSource")
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

impl KafkaEventSource {
    /// Creates a consumer in `group_id` and subscribes it to `topics`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connection`] if the consumer cannot be
    /// created or the subscription is rejected.
    pub fn connect(
        brokers: &[String],
        group_id: &str,
        topics: &[String],
    ) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .create()
            .map_err(|e| SourceError::Connection(format!("failed to create consumer: {e}")))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| SourceError::Connection(format!("failed to subscribe: {e}")))?;

        tracing::info!(brokers = %brokers.join(","), group_id, ?topics, "kafka consumer subscribed");
        Ok(Self {
            consumer,
            topics: topics.to_vec(),
        })
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn next_event(&mut self) -> Option<Result<Bytes, SourceError>> {
        loop {
            let payload = match self.consumer.recv().await {
                Ok(message) => {
                    let payload = message.payload().map(Bytes::copy_from_slice);
                    if payload.is_none() {
                        tracing::debug!(
                            topic = message.topic(),
                            partition = message.partition(),
                            offset = message.offset(),
                            "skipping record without payload"
                        );
                    }
                    payload
                }
                Err(e) => return Some(Err(SourceError::Receive(e.to_string()))),
            };
            if let Some(payload) = payload {
                return Some(Ok(payload));
            }
        }
    }
}
