//! End-to-end flows over real sockets: WebSocket clients, HTTP ingress
//! and the registry behind them.

#![allow(clippy::panic)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use notify_hub::app_state::AppState;
use notify_hub::domain::{ClientId, ConnectionRegistry, SessionId};
use notify_hub::server;
use notify_hub::ws::ConnectionLimits;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Hub {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    http: reqwest::Client,
}

impl Hub {
    async fn start(limits: ConnectionLimits) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let state = AppState::new(Arc::clone(&registry), Arc::new(limits));
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            panic!("loopback bind should succeed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("bound listener has an address");
        };
        let cancel = CancellationToken::new();
        tokio::spawn(server::serve(listener, state, cancel.clone()));
        Self {
            addr,
            registry,
            cancel,
            http: reqwest::Client::new(),
        }
    }

    async fn try_connect(&self, path: &str) -> Result<Client, tungstenite::Error> {
        let url = format!("ws://{}{path}", self.addr);
        tokio_tungstenite::connect_async(url).await.map(|(ws, _)| ws)
    }

    async fn connect(&self, client: ClientId, query: &str) -> Client {
        let Ok(ws) = self.try_connect(&format!("/ws/notify/{client}{query}")).await else {
            panic!("upgrade should succeed");
        };
        let registry = Arc::clone(&self.registry);
        wait_for(move || {
            let registry = Arc::clone(&registry);
            async move { registry.is_connected(client).await }
        })
        .await;
        ws
    }

    async fn post(&self, path: &str, body: &str) -> u16 {
        let Ok(response) = self
            .http
            .post(format!("http://{}{path}", self.addr))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
        else {
            panic!("hub should answer");
        };
        response.status().as_u16()
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn next_payload(ws: &mut Client) -> Bytes {
    loop {
        let Ok(Some(Ok(message))) = timeout(Duration::from_secs(5), ws.next()).await else {
            panic!("expected a frame from the hub");
        };
        if message.is_text() || message.is_binary() {
            return message.into_data();
        }
    }
}

#[tokio::test]
async fn session_subscription_receives_notifications() {
    let hub = Hub::start(ConnectionLimits::default()).await;
    let client = ClientId::new();
    let session = SessionId::new();
    let mut ws = hub.connect(client, "").await;

    let frame = format!(r#"{{"subscribe_session":"{session}"}}"#);
    let Ok(()) = ws.send(Message::text(frame)).await else {
        panic!("control frame should send");
    };
    let registry = Arc::clone(&hub.registry);
    wait_for(move || {
        let registry = Arc::clone(&registry);
        async move { registry.session_members(session).await == vec![client] }
    })
    .await;

    let status = hub
        .post(
            &format!("/notify/session/{session}"),
            r#"{"event":"session.created","payload":{"queue":"billing"}}"#,
        )
        .await;
    assert_eq!(status, 200);

    let payload = next_payload(&mut ws).await;
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(&payload) else {
        panic!("notification should be JSON");
    };
    assert_eq!(
        value,
        serde_json::json!({"event": "session.created", "payload": {"queue": "billing"}})
    );
}

#[tokio::test]
async fn region_envelope_is_forwarded_verbatim() {
    let hub = Hub::start(ConnectionLimits::default()).await;
    let inside = ClientId::new();
    let outside = ClientId::new();
    let mut ws_inside = hub.connect(inside, "?region=eu-west&roles=agent,lead").await;
    let _ws_outside = hub.connect(outside, "?region=us-east").await;

    let envelope = r#"{"event":"maintenance","regions":["eu-west","eu-west"],"payload":{"at":"02:00"}}"#;
    assert_eq!(hub.post("/api/v1/events", envelope).await, 202);

    assert_eq!(next_payload(&mut ws_inside).await, Bytes::from(envelope));
    let stats = hub.registry.stats().await;
    assert_eq!(stats.enqueued_total, 1);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let hub = Hub::start(ConnectionLimits::default()).await;

    match hub.try_connect("/ws/notify/not-a-uuid").await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 400),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("malformed user id must not upgrade"),
    }

    assert_eq!(hub.post("/notify/session/abc", r#"{"event":"x"}"#).await, 400);
    let session = SessionId::new();
    assert_eq!(
        hub.post(&format!("/notify/session/{session}"), r#"{"payload":1}"#).await,
        400
    );
    assert_eq!(hub.post("/api/v1/events", "{oops").await, 400);
}

#[tokio::test]
async fn reconnect_replaces_previous_connection() {
    let hub = Hub::start(ConnectionLimits::default()).await;
    let client = ClientId::new();
    let mut first = hub.connect(client, "").await;
    let mut second = hub.connect(client, "").await;

    // The replaced socket is closed by the hub.
    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "replaced connection should be closed");

    assert!(hub.registry.is_connected(client).await);
    let envelope = format!(r#"{{"user_id":"{client}"}}"#);
    assert_eq!(hub.post("/api/v1/events", &envelope).await, 202);
    assert_eq!(next_payload(&mut second).await, Bytes::from(envelope));
}

#[tokio::test]
async fn disconnect_unregisters_client() {
    let hub = Hub::start(ConnectionLimits::default()).await;
    let client = ClientId::new();
    let session = SessionId::new();
    let mut ws = hub.connect(client, "").await;
    hub.registry.subscribe_session(session, client).await;

    let Ok(()) = ws.close(None).await else {
        panic!("close should send");
    };

    let registry = Arc::clone(&hub.registry);
    wait_for(move || {
        let registry = Arc::clone(&registry);
        async move {
            !registry.is_connected(client).await && registry.session_members(session).await.is_empty()
        }
    })
    .await;
}

#[tokio::test]
async fn per_ip_limit_rejects_extra_connections() {
    let hub = Hub::start(ConnectionLimits::new(1, 0)).await;
    let first = ClientId::new();
    let _ws = hub.connect(first, "").await;

    match hub.try_connect(&format!("/ws/notify/{}", ClientId::new())).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 503),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("second connection from the same address must be refused"),
    }
}
