//! In-process event source backed by a tokio channel.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{EventSource, SourceError};

/// Receives envelopes pushed by producers in the same process.
///
/// The source is exhausted once every sender has been dropped and the
/// channel is empty.
#[derive(Debug)]
pub struct ChannelEventSource {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelEventSource {
    /// Wraps an existing receiver.
    #[must_use]
    pub const fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Creates a bounded channel and returns its sending half with the
    /// source.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<Result<Bytes, SourceError>> {
        self.rx.recv().await.map(Ok)
    }
}
