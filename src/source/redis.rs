//! Redis pub/sub relay between hub instances.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Msg};

use super::relay::{EventRelay, RELAY_CHANNEL};
use super::{EventSource, SourceError};

/// Publishes envelopes on [`RELAY_CHANNEL`].
///
/// The connection manager reconnects on its own after a dropped link.
#[derive(Clone)]
pub struct RedisRelay {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRelay")
            .field("channel", &RELAY_CHANNEL)
            .finish_non_exhaustive()
    }
}

impl RedisRelay {
    /// Connects the publishing side to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connection`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, SourceError> {
        let client = Client::open(url)
            .map_err(|e| SourceError::Connection(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SourceError::Connection(format!("failed to connect to redis: {e}")))?;
        tracing::info!(channel = RELAY_CHANNEL, "redis relay connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl EventRelay for RedisRelay {
    async fn publish(&self, envelope: Bytes) -> Result<(), SourceError> {
        let mut conn = self.conn.clone();
        let data: &[u8] = envelope.as_ref();
        conn.publish::<_, _, ()>(RELAY_CHANNEL, data)
            .await
            .map_err(|e| SourceError::Connection(format!("redis publish failed: {e}")))
    }
}

type Messages = Pin<Box<dyn Stream<Item = Msg> + Send>>;

/// Receives envelopes published on [`RELAY_CHANNEL`] by any instance.
///
/// A lost subscription is reported as a receive error and re-established
/// on the next call, so the source never runs dry.
pub struct RedisEventSource {
    client: Client,
    messages: Option<Messages>,
}

impl fmt::Debug for RedisEventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisEventSource")
            .field("channel", &RELAY_CHANNEL)
            .field("subscribed", &self.messages.is_some())
            .finish_non_exhaustive()
    }
}

impl RedisEventSource {
    /// Subscribes to [`RELAY_CHANNEL`] on `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connection`] if the URL is invalid or the
    /// subscription fails.
    pub async fn subscribe(url: &str) -> Result<Self, SourceError> {
        let client = Client::open(url)
            .map_err(|e| SourceError::Connection(format!("invalid redis url: {e}")))?;
        let messages = open_subscription(&client).await?;
        tracing::info!(channel = RELAY_CHANNEL, "redis relay subscribed");
        Ok(Self {
            client,
            messages: Some(messages),
        })
    }
}

async fn open_subscription(client: &Client) -> Result<Messages, SourceError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| SourceError::Connection(format!("failed to open redis pubsub: {e}")))?;
    pubsub
        .subscribe(RELAY_CHANNEL)
        .await
        .map_err(|e| SourceError::Connection(format!("failed to subscribe: {e}")))?;
    Ok(Box::pin(pubsub.into_on_message()))
}

#[async_trait]
impl EventSource for RedisEventSource {
    async fn next_event(&mut self) -> Option<Result<Bytes, SourceError>> {
        let mut messages = match self.messages.take() {
            Some(messages) => messages,
            None => match open_subscription(&self.client).await {
                Ok(messages) => {
                    tracing::info!(channel = RELAY_CHANNEL, "redis relay resubscribed");
                    messages
                }
                Err(err) => return Some(Err(err)),
            },
        };

        let Some(msg) = messages.next().await else {
            return Some(Err(SourceError::Receive(
                "redis subscription closed".to_string(),
            )));
        };
        self.messages = Some(messages);
        Some(Ok(Bytes::copy_from_slice(msg.get_payload_bytes())))
    }
}
