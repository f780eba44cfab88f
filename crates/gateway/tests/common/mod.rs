//! Shared harness for gateway integration tests.
//!
//! Boots the real axum frontend on an ephemeral port with stubbed upstream
//! collaborators; bus records are injected through the dispatcher.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use gateway::config::ServerSettings;
use gateway::ws_server::{create_router, AppState, UserIdResolver};
use gateway::{CurrencyService, Dispatcher, Hub, RateProvider, SubscriptionTracker, Transformer};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestGateway {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
    pub tracker: Arc<SubscriptionTracker>,
    pub dispatcher: Arc<Dispatcher>,
}

struct StaticResolver {
    mappings: HashMap<i64, String>,
}

#[async_trait]
impl UserIdResolver for StaticResolver {
    async fn resolve_cfx_user_id(&self, ajaib_id: i64) -> external_services::Result<String> {
        self.mappings
            .get(&ajaib_id)
            .cloned()
            .ok_or_else(|| external_services::Error::MappingNotFound(ajaib_id.to_string()))
    }
}

struct FixedRate(f64);

#[async_trait]
impl RateProvider for FixedRate {
    async fn fetch_rate(&self) -> external_services::Result<f64> {
        if self.0 > 0.0 {
            Ok(self.0)
        } else {
            Err(external_services::Error::Api("rate provider down".to_string()))
        }
    }
}

/// Start a gateway with stubbed collaborators on an ephemeral port.
pub async fn start_gateway(
    max_connections_per_user: usize,
    rate: f64,
    mappings: &[(i64, &str)],
) -> TestGateway {
    let hub = Arc::new(Hub::new(max_connections_per_user));
    let tracker = Arc::new(SubscriptionTracker::new());

    let currency = Arc::new(CurrencyService::new(
        Arc::new(FixedRate(rate)),
        Duration::from_secs(3600),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        hub.clone(),
        tracker.clone(),
        Transformer::new(currency),
    ));

    let resolver = Arc::new(StaticResolver {
        mappings: mappings
            .iter()
            .map(|(id, cfx)| (*id, cfx.to_string()))
            .collect(),
    });

    let state = Arc::new(AppState {
        hub: hub.clone(),
        tracker: tracker.clone(),
        resolver,
        settings: ServerSettings::default(),
    });

    let app = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestGateway {
        addr,
        hub,
        tracker,
        dispatcher,
    }
}

/// Unsigned bearer token whose claims segment carries the given subject.
pub fn bearer_token(sub: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{}"}}"#, sub));
    format!("{}.{}.sig", header, claims)
}

/// Connect with the credential in the `token` query parameter.
pub async fn connect_with_query(addr: SocketAddr, sub: &str) -> WsClient {
    let url = format!("ws://{}/ws?token={}", addr, bearer_token(sub));
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Connect with the credential in the `X-Socket-Authorization` header.
pub async fn connect_with_header(addr: SocketAddr, sub: &str) -> WsClient {
    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    request.headers_mut().insert(
        "X-Socket-Authorization",
        format!("Bearer {}", bearer_token(sub)).parse().unwrap(),
    );
    let (ws, _) = connect_async(request).await.unwrap();
    ws
}

/// Attempt a connection, returning the raw handshake result.
pub async fn try_connect(
    addr: SocketAddr,
    sub: &str,
) -> Result<WsClient, tokio_tungstenite::tungstenite::Error> {
    let url = format!("ws://{}/ws?token={}", addr, bearer_token(sub));
    connect_async(url).await.map(|(ws, _)| ws)
}

/// Send a JSON text frame.
pub async fn send_json(ws: &mut WsClient, frame: &str) {
    ws.send(Message::text(frame)).await.unwrap();
}

/// Receive the next JSON text frame, skipping transport control frames.
pub async fn recv_json(ws: &mut WsClient) -> Value {
    let deadline = Duration::from_secs(2);
    loop {
        let message = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("websocket error");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Assert that no text frame arrives within the given window.
pub async fn expect_silence(ws: &mut WsClient, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await;
    if let Ok(Some(Ok(Message::Text(text)))) = result {
        panic!("expected silence, got frame: {}", text);
    }
}

/// Wait until the hub reports the expected number of live sessions.
pub async fn wait_for_client_count(hub: &Hub, expected: usize) {
    for _ in 0..100 {
        if hub.client_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "hub never reached {} clients (now {})",
        expected,
        hub.client_count()
    );
}
