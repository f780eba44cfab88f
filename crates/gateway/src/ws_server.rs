//! WebSocket frontend using Axum.
//!
//! Authenticates upgrade requests, resolves the connecting user's CFX id,
//! registers a session with the hub, and runs the two pumps. Protocol
//! errors are reported on the offending session with the matching error
//! code and never close it; credential and capacity errors fail the
//! upgrade before any session exists.

use crate::auth::subject_from_bearer;
use crate::channel::parse_channel;
use crate::config::ServerSettings;
use crate::hub::Hub;
use crate::protocol::{
    Frame, CODE_ALREADY_SUBSCRIBED, CODE_BAD_REQUEST, CODE_CHANNEL_NOT_FOUND,
    CODE_CONNECTION_LIMIT, CODE_INTERNAL, CODE_NOT_SUBSCRIBED, TYPE_PING, TYPE_SUBSCRIBE,
    TYPE_UNSUBSCRIBE,
};
use crate::session::Session;
use crate::tracker::SubscriptionTracker;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use external_services::CfxAdapterClient;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Largest accepted client frame.
const READ_LIMIT: usize = 512 * 1024;

/// Deadline for a single socket write.
const WRITE_WAIT: Duration = Duration::from_secs(10);

const UNAUTHORIZED_BODY: &str = r#"{"type":"error","code":4100,"message":"unauthorized"}"#;
const CONNECTION_LIMIT_BODY: &str =
    r#"{"type":"error","code":4200,"message":"connection limit reached"}"#;

/// Resolves an Ajaib user id to the CFX user id used on bus records.
#[async_trait]
pub trait UserIdResolver: Send + Sync {
    async fn resolve_cfx_user_id(&self, ajaib_id: i64) -> external_services::Result<String>;
}

#[async_trait]
impl UserIdResolver for CfxAdapterClient {
    async fn resolve_cfx_user_id(&self, ajaib_id: i64) -> external_services::Result<String> {
        self.cfx_user_id(ajaib_id).await
    }
}

/// Shared application state.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub tracker: Arc<SubscriptionTracker>,
    pub resolver: Arc<dyn UserIdResolver>,
    pub settings: ServerSettings,
}

/// Create the WebSocket router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        connections: state.hub.client_count(),
    })
}

/// WebSocket upgrade handler.
///
/// The credential lives in `X-Socket-Authorization`, falling back to the
/// `token` query parameter because browsers cannot set custom headers on
/// upgrade requests.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let token = headers
        .get("X-Socket-Authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| params.get("token").cloned());

    let Some(ajaib_id) = token.as_deref().and_then(subject_from_bearer) else {
        warn!("unauthorized, missing or invalid credential");
        return error_response(StatusCode::UNAUTHORIZED, UNAUTHORIZED_BODY);
    };

    if !state.hub.can_user_connect(&ajaib_id) {
        warn!(%ajaib_id, "connection limit reached, rejecting upgrade");
        return error_response(StatusCode::TOO_MANY_REQUESTS, CONNECTION_LIMIT_BODY);
    }

    ws.max_message_size(READ_LIMIT)
        .write_buffer_size(state.settings.write_buffer_size)
        .on_upgrade(move |socket| handle_socket(socket, state, ajaib_id))
}

fn error_response(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Handle an upgraded WebSocket connection for its whole lifetime.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, ajaib_id: String) {
    // Resolution failure is non-fatal: the session proceeds with an empty
    // CFX id, which simply means no bus traffic will route to it.
    let cfx_user_id = resolve_cfx_user_id(&state, &ajaib_id).await;

    let (session, rx) = Session::new(ajaib_id, cfx_user_id);

    if state.hub.register(session.clone()).is_err() {
        // Lost the limit race between the pre-upgrade check and now.
        if let Ok(encoded) = Frame::disconnect(CODE_CONNECTION_LIMIT, "connection limit reached").encode() {
            let _ = socket.send(Message::Text(encoded.into())).await;
        }
        return;
    }

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_connections").set(state.hub.client_count() as f64);

    info!(
        client_id = %session.id(),
        ajaib_id = %session.ajaib_id(),
        cfx_user_id = %session.cfx_user_id(),
        "new websocket connection"
    );

    match Frame::connected(&session.id().to_string(), session.ajaib_id()) {
        Ok(frame) => {
            if let Err(e) = session.send_frame(&frame) {
                warn!(client_id = %session.id(), error = %e, "failed to enqueue connected frame");
            }
        }
        Err(e) => warn!(client_id = %session.id(), error = %e, "failed to build connected frame"),
    }

    let (ws_tx, ws_rx) = socket.split();

    let write_task = tokio::spawn(write_pump(ws_tx, rx, session.clone(), state.clone()));

    read_pump(ws_rx, &state, &session).await;

    teardown_session(&state.hub, &state.tracker, &session);
    let _ = write_task.await;

    gauge!("gateway_active_connections").set(state.hub.client_count() as f64);
}

async fn resolve_cfx_user_id(state: &AppState, ajaib_id: &str) -> String {
    let id = match ajaib_id.parse::<i64>() {
        Ok(id) => id,
        Err(e) => {
            warn!(%ajaib_id, error = %e, "invalid ajaib_id format");
            return String::new();
        }
    };

    match state.resolver.resolve_cfx_user_id(id).await {
        Ok(cfx_user_id) => cfx_user_id,
        Err(e) => {
            warn!(%ajaib_id, error = %e, "failed to resolve ajaib_id to cfx_user_id");
            String::new()
        }
    }
}

/// Read pump: parse incoming frames and dispatch protocol commands.
///
/// The read deadline is `ping_timeout` from the last received frame; a
/// peer that stops acknowledging pings trips it and the session ends.
async fn read_pump(mut ws_rx: SplitStream<WebSocket>, state: &Arc<AppState>, session: &Arc<Session>) {
    let pong_timeout = state.settings.ping_timeout;

    loop {
        tokio::select! {
            biased;

            _ = session.wait_closed() => break,

            next = timeout(pong_timeout, ws_rx.next()) => {
                match next {
                    Err(_) => {
                        warn!(client_id = %session.id(), "read deadline expired, closing session");
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        debug!(client_id = %session.id(), error = %e, "websocket read error");
                        break;
                    }
                    Ok(Some(Ok(message))) => match message {
                        Message::Text(text) => handle_frame(state, session, text.as_bytes()),
                        Message::Binary(data) => handle_frame(state, session, &data),
                        Message::Ping(data) => {
                            let _ = session.enqueue(Message::Pong(data));
                        }
                        Message::Pong(_) => {}
                        Message::Close(_) => break,
                    },
                }
            }
        }
    }
}

/// Write pump: drain the outbound queue and keep the peer alive with
/// transport pings every `ping_interval`.
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    session: Arc<Session>,
    state: Arc<AppState>,
) {
    let mut ping = interval(state.settings.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            maybe = rx.recv() => {
                match maybe {
                    Some(message) => match timeout(WRITE_WAIT, ws_tx.send(message)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(client_id = %session.id(), error = %e, "websocket write failed");
                            break;
                        }
                        Err(_) => {
                            warn!(client_id = %session.id(), "write deadline expired");
                            break;
                        }
                    },
                    None => {
                        // Queue closed by teardown and fully drained.
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                match timeout(WRITE_WAIT, ws_tx.send(Message::Ping(vec![].into()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }

    teardown_session(&state.hub, &state.tracker, &session);
}

/// Tear a session down exactly once: unregister from the hub, release its
/// tracker registrations, and wake both pumps.
pub fn teardown_session(hub: &Hub, tracker: &SubscriptionTracker, session: &Session) {
    if !session.begin_teardown() {
        return;
    }

    let channels = hub.unregister(session);
    if !session.cfx_user_id().is_empty() {
        for _ in &channels {
            tracker.unregister(session.cfx_user_id());
        }
    }
    session.notify_closed();

    counter!("gateway_disconnections_total").increment(1);
    info!(client_id = %session.id(), ajaib_id = %session.ajaib_id(), "session closed");
}

/// Handle one raw frame from the peer. Errors are reported on the session
/// and never end it.
fn handle_frame(state: &Arc<AppState>, session: &Arc<Session>, raw: &[u8]) {
    let frame = match Frame::parse(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(client_id = %session.id(), error = %e, "failed to parse frame");
            reply(session, Frame::error(None, CODE_BAD_REQUEST, "invalid message format"));
            return;
        }
    };

    debug!(client_id = %session.id(), frame_type = %frame.frame_type, id = ?frame.id, "received frame");

    match frame.frame_type.as_str() {
        TYPE_PING => reply(session, Frame::pong(frame.id)),
        TYPE_SUBSCRIBE => handle_subscribe(state, session, frame),
        TYPE_UNSUBSCRIBE => handle_unsubscribe(state, session, frame),
        other => {
            warn!(client_id = %session.id(), frame_type = %other, "unknown message type");
            reply(session, Frame::error(frame.id, CODE_BAD_REQUEST, "unknown message type"));
        }
    }
}

fn handle_subscribe(state: &Arc<AppState>, session: &Arc<Session>, frame: Frame) {
    let Frame { id, channel, .. } = frame;

    let Some(channel) = channel.filter(|c| !c.is_empty()) else {
        reply(session, Frame::error(id, CODE_BAD_REQUEST, "channel required"));
        return;
    };

    let info = match parse_channel(&channel) {
        Ok(info) => info,
        Err(e) => {
            warn!(client_id = %session.id(), %channel, error = %e, "subscription validation failed");
            reply(session, Frame::error(id, CODE_CHANNEL_NOT_FOUND, &e.to_string()));
            return;
        }
    };

    if info.ajaib_id != session.ajaib_id() {
        warn!(
            client_id = %session.id(),
            session_ajaib_id = %session.ajaib_id(),
            channel_ajaib_id = %info.ajaib_id,
            "subscription user mismatch"
        );
        reply(session, Frame::error(id, CODE_CHANNEL_NOT_FOUND, "channel not found"));
        return;
    }

    if session.is_subscribed(&channel) {
        reply(
            session,
            Frame::error(id, CODE_ALREADY_SUBSCRIBED, "already subscribed to channel"),
        );
        return;
    }

    if state.hub.subscribe(session, &channel).is_err() {
        reply(session, Frame::error(id, CODE_INTERNAL, "internal error"));
        return;
    }

    if !session.cfx_user_id().is_empty() {
        state.tracker.register(session.cfx_user_id(), session.ajaib_id());
    }

    info!(client_id = %session.id(), %channel, "client subscribed to channel");
    reply(session, Frame::subscribed(id, &channel));
}

fn handle_unsubscribe(state: &Arc<AppState>, session: &Arc<Session>, frame: Frame) {
    let Frame { id, channel, .. } = frame;

    let Some(channel) = channel.filter(|c| !c.is_empty()) else {
        reply(session, Frame::error(id, CODE_BAD_REQUEST, "channel required"));
        return;
    };

    if !session.is_subscribed(&channel) {
        reply(
            session,
            Frame::error(id, CODE_NOT_SUBSCRIBED, "not subscribed to channel"),
        );
        return;
    }

    state.hub.unsubscribe(session, &channel);
    if !session.cfx_user_id().is_empty() {
        state.tracker.unregister(session.cfx_user_id());
    }

    info!(client_id = %session.id(), %channel, "client unsubscribed from channel");
    reply(session, Frame::unsubscribed(id, &channel));
}

fn reply(session: &Session, frame: Frame) {
    if let Err(e) = session.send_frame(&frame) {
        debug!(client_id = %session.id(), error = %e, "failed to enqueue reply");
    }
}
