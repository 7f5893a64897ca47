//! Per-connection delivery pumps.
//!
//! Every connection runs two loops. The write loop drains the client's
//! outbound queue onto the socket in enqueue order; the read loop applies
//! session control frames to the registry. Both are generic over the
//! socket halves so they can be driven by in-memory channels in tests.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use super::messages::ControlFrame;
use crate::domain::{ClientId, ClientMetadata, ConnectionRegistry, SessionId};

/// Why a write loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteExit {
    /// The outbound queue was closed and fully drained.
    Drained,
    /// A frame could not be written.
    TransportFailed,
}

/// Why a read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadExit {
    /// The client sent a close frame or the stream ended.
    Closed,
    /// Reading from the socket failed.
    TransportFailed,
}

/// Writes every queued payload to `sink` as one frame, then closes it.
///
/// UTF-8 payloads go out as text frames, anything else as binary.
pub async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Bytes>,
    client_id: ClientId,
) -> WriteExit
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let exit = loop {
        let Some(payload) = outbound.recv().await else {
            break WriteExit::Drained;
        };
        if let Err(err) = sink.send(to_frame(payload)).await {
            tracing::debug!(%client_id, error = %err, "websocket write failed");
            break WriteExit::TransportFailed;
        }
    };

    if let Err(err) = sink.close().await {
        tracing::trace!(%client_id, error = %err, "websocket close failed");
    }
    exit
}

/// Wraps `payload` without copying it; every recipient's frame shares the
/// same buffer.
fn to_frame(payload: Bytes) -> Message {
    match Utf8Bytes::try_from(payload.clone()) {
        Ok(text) => Message::Text(text),
        Err(_) => Message::Binary(payload),
    }
}

/// Reads frames from `stream` and applies session control frames until
/// the client goes away.
///
/// Frames that are not control records are ignored.
pub async fn read_loop<R, E>(
    mut stream: R,
    registry: &ConnectionRegistry,
    client_id: ClientId,
) -> ReadExit
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(message) = stream.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => ControlFrame::decode(text.as_str().as_bytes()),
            Ok(Message::Binary(data)) => ControlFrame::decode(&data),
            Ok(Message::Close(_)) => return ReadExit::Closed,
            Ok(Message::Ping(_) | Message::Pong(_)) => None,
            Err(err) => {
                tracing::debug!(%client_id, error = %err, "websocket read failed");
                return ReadExit::TransportFailed;
            }
        };
        if let Some(frame) = frame {
            apply_control(&frame, registry, client_id).await;
        }
    }
    ReadExit::Closed
}

async fn apply_control(frame: &ControlFrame, registry: &ConnectionRegistry, client_id: ClientId) {
    if let Some(session_id) = parse_session(frame.subscribe_session.as_deref(), client_id) {
        registry.subscribe_session(session_id, client_id).await;
        tracing::debug!(%client_id, %session_id, "subscribed to session");
    }
    if let Some(session_id) = parse_session(frame.unsubscribe_session.as_deref(), client_id) {
        registry.unsubscribe_session(session_id, client_id).await;
        tracing::debug!(%client_id, %session_id, "unsubscribed from session");
    }
}

fn parse_session(raw: Option<&str>, client_id: ClientId) -> Option<SessionId> {
    let raw = raw.filter(|s| !s.trim().is_empty())?;
    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::debug!(%client_id, session = raw, "ignoring malformed session id");
            None
        }
    }
}

/// Registers the client, runs both pumps over `socket` and unregisters
/// when either pump stops.
///
/// `socket` is normally an axum
/// [`WebSocket`](axum::extract::ws::WebSocket). A connection that was
/// replaced by a newer registration of the same client leaves the newer
/// one untouched.
pub async fn run_connection<S, E>(
    socket: S,
    client_id: ClientId,
    metadata: ClientMetadata,
    registry: Arc<ConnectionRegistry>,
) where
    S: Sink<Message> + Stream<Item = Result<Message, E>> + Send + 'static,
    <S as Sink<Message>>::Error: Display + Send,
    E: Display + Send + 'static,
{
    let connection = registry.register(client_id, socket, metadata).await;
    let connection_id = connection.connection_id();
    let (socket, outbound) = connection.into_parts();
    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(sink, outbound, client_id));
    let mut writer_finished = false;

    tokio::select! {
        exit = read_loop(stream, &registry, client_id) => {
            tracing::debug!(%client_id, ?exit, "read loop finished");
        }
        exit = &mut writer => {
            writer_finished = true;
            tracing::debug!(%client_id, ?exit, "write loop finished");
        }
    }

    registry.unregister_connection(client_id, connection_id).await;

    if !writer_finished && let Err(err) = writer.await {
        tracing::warn!(%client_id, error = %err, "write loop task failed");
    }
    tracing::info!(%client_id, "websocket connection closed");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use futures::channel::mpsc as fake;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;

    /// In-memory socket: frames written go to `outgoing`, frames read come
    /// from `incoming`.
    struct FakeSocket {
        outgoing: fake::UnboundedSender<Message>,
        incoming: fake::UnboundedReceiver<Result<Message, String>>,
    }

    impl Sink<Message> for FakeSocket {
        type Error = fake::SendError;

        fn poll_ready(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Sink::poll_ready(Pin::new(&mut self.outgoing), cx)
        }

        fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            Sink::start_send(Pin::new(&mut self.outgoing), item)
        }

        fn poll_flush(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Sink::poll_flush(Pin::new(&mut self.outgoing), cx)
        }

        fn poll_close(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Sink::poll_close(Pin::new(&mut self.outgoing), cx)
        }
    }

    impl Stream for FakeSocket {
        type Item = Result<Message, String>;

        fn poll_next(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.incoming).poll_next(cx)
        }
    }

    fn text(body: &str) -> Result<Message, String> {
        Ok(Message::text(body))
    }

    #[test]
    fn write_loop_waits_for_payloads_then_drains() {
        let (tx, rx) = mpsc::channel(8);
        let (sink, mut frames) = fake::unbounded::<Message>();
        let mut pump = task::spawn(write_loop(sink, rx, ClientId::new()));

        assert_pending!(pump.poll());

        let Ok(()) = tx.try_send(Bytes::from_static(b"{\"n\":1}")) else {
            panic!("queue has room");
        };
        let Ok(()) = tx.try_send(Bytes::from_static(&[0xff, 0x00])) else {
            panic!("queue has room");
        };
        assert_pending!(pump.poll());

        drop(tx);
        assert_ready_eq!(pump.poll(), WriteExit::Drained);

        let Ok(Some(first)) = frames.try_next() else {
            panic!("first frame missing");
        };
        let Ok(Some(second)) = frames.try_next() else {
            panic!("second frame missing");
        };
        assert_eq!(first, Message::text("{\"n\":1}"));
        assert_eq!(second, Message::Binary(Bytes::from_static(&[0xff, 0x00])));
        // Sink was closed on exit.
        assert!(matches!(frames.try_next(), Ok(None)));
    }

    #[test]
    fn text_frames_share_the_payload_buffer() {
        let payload = Bytes::from(r#"{"event":"shared"}"#.to_string());
        let Message::Text(text) = to_frame(payload.clone()) else {
            panic!("UTF-8 payload should become a text frame");
        };
        assert_eq!(Bytes::from(text).as_ptr(), payload.as_ptr());
    }

    #[tokio::test]
    async fn write_loop_stops_on_transport_failure() {
        let (tx, rx) = mpsc::channel(8);
        let (sink, frames) = fake::unbounded::<Message>();
        drop(frames);
        let Ok(()) = tx.try_send(Bytes::from_static(b"lost")) else {
            panic!("queue has room");
        };

        let exit = write_loop(sink, rx, ClientId::new()).await;
        assert_eq!(exit, WriteExit::TransportFailed);
    }

    #[tokio::test]
    async fn read_loop_applies_control_frames() {
        let registry = ConnectionRegistry::new(4);
        let client = ClientId::new();
        let keep = SessionId::new();
        let leave = SessionId::new();
        registry.subscribe_session(leave, client).await;

        let frames = futures::stream::iter(vec![
            text(&format!(r#"{{"subscribe_session":"{keep}"}}"#)),
            text("not json"),
            text(r#"{"subscribe_session":"not-a-uuid"}"#),
            Ok(Message::Ping(Bytes::new())),
            text(&format!(r#"{{"unsubscribe_session":"{leave}"}}"#)),
        ]);

        let exit = read_loop(frames, &registry, client).await;
        assert_eq!(exit, ReadExit::Closed);
        assert_eq!(registry.session_members(keep).await, vec![client]);
        assert!(registry.session_members(leave).await.is_empty());
    }

    #[tokio::test]
    async fn read_loop_stops_at_close_frame() {
        let registry = ConnectionRegistry::new(4);
        let client = ClientId::new();
        let session = SessionId::new();

        let frames = futures::stream::iter(vec![
            Ok(Message::Close(None)),
            text(&format!(r#"{{"subscribe_session":"{session}"}}"#)),
        ]);

        assert_eq!(read_loop(frames, &registry, client).await, ReadExit::Closed);
        assert!(registry.session_members(session).await.is_empty());
    }

    #[tokio::test]
    async fn read_loop_reports_transport_errors() {
        let registry = ConnectionRegistry::new(4);
        let frames = futures::stream::iter(vec![Err::<Message, _>("reset".to_string())]);
        let exit = read_loop(frames, &registry, ClientId::new()).await;
        assert_eq!(exit, ReadExit::TransportFailed);
    }

    #[tokio::test]
    async fn write_failure_unregisters_only_that_client() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let broken = ClientId::new();
        let healthy = ClientId::new();

        let (outgoing, written) = fake::unbounded();
        let (_incoming_tx, incoming) = fake::unbounded();
        drop(written);
        let socket = FakeSocket { outgoing, incoming };
        let pump = tokio::spawn(run_connection(
            socket,
            broken,
            ClientMetadata::default(),
            Arc::clone(&registry),
        ));

        let conn = registry
            .register(healthy, (), ClientMetadata::default())
            .await;
        let (_, mut healthy_rx) = conn.into_parts();

        for _ in 0..100 {
            if registry.is_connected(broken).await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(registry.is_connected(broken).await);

        let first = Bytes::from_static(b"first");
        let report = registry
            .broadcast_to_users(&[broken, healthy], first.clone())
            .await;
        assert_eq!(report.enqueued, 2);

        let Ok(Ok(())) = tokio::time::timeout(Duration::from_secs(5), pump).await else {
            panic!("connection should end after the write failure");
        };
        assert!(!registry.is_connected(broken).await);
        assert!(registry.is_connected(healthy).await);
        assert_eq!(healthy_rx.recv().await, Some(first));

        let second = Bytes::from_static(b"second");
        let report = registry
            .broadcast_to_users(&[broken, healthy], second.clone())
            .await;
        assert_eq!(report.enqueued, 1);
        assert_eq!(report.offline, 1);
        assert_eq!(healthy_rx.recv().await, Some(second));
    }
}
