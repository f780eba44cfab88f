//! Per-connection session state.
//!
//! A `Session` is the shared handle for one connected client. The read and
//! write pumps own the socket halves; the hub and ingress path only ever see
//! this handle. Fields set at construction are immutable for the session's
//! lifetime; the subscription set is mutated only while holding the hub
//! lock, and the outbound queue is closed exactly once during teardown.

use crate::error::{GatewayError, Result};
use crate::protocol::Frame;
use axum::extract::ws::Message;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Unique session identifier.
pub type SessionId = Uuid;

/// Outbound queue capacity per session. Broadcasts drop frames for a
/// recipient whose queue is full rather than block.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// State for a single connected client.
pub struct Session {
    id: SessionId,
    ajaib_id: String,
    cfx_user_id: String,
    /// Outbound queue sender; taken (dropped) exactly once on teardown so
    /// the write pump observes a closed queue after draining.
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    /// Channels this session is subscribed to. Written under the hub lock.
    subscriptions: DashSet<String>,
    /// Wakes the read pump when teardown is initiated elsewhere.
    closed: Notify,
    torn_down: AtomicBool,
}

impl Session {
    /// Create a session and the receiving half of its outbound queue.
    pub fn new(ajaib_id: String, cfx_user_id: String) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            ajaib_id,
            cfx_user_id,
            sender: Mutex::new(Some(tx)),
            subscriptions: DashSet::new(),
            closed: Notify::new(),
            torn_down: AtomicBool::new(false),
        });
        (session, rx)
    }

    /// Session's unique identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Ajaib user id asserted by the credential at connect time.
    pub fn ajaib_id(&self) -> &str {
        &self.ajaib_id
    }

    /// CFX user id resolved at connect time; empty when resolution failed.
    pub fn cfx_user_id(&self) -> &str {
        &self.cfx_user_id
    }

    /// Enqueue an already-encoded message without blocking.
    pub fn enqueue(&self, message: Message) -> Result<()> {
        let guard = self.sender.lock();
        let tx = guard.as_ref().ok_or(GatewayError::SendQueueClosed)?;
        tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => GatewayError::SendQueueFull,
            mpsc::error::TrySendError::Closed(_) => GatewayError::SendQueueClosed,
        })
    }

    /// Encode and enqueue a protocol frame.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        let encoded = frame.encode()?;
        self.enqueue(Message::Text(encoded.into()))
    }

    /// Close the outbound queue. Idempotent; the first call drops the
    /// sender, which lets the write pump drain buffered frames and exit.
    pub fn close_queue(&self) {
        self.sender.lock().take();
    }

    /// Mark teardown as started. Returns true exactly once.
    pub fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }

    /// Wake the read pump so it stops promptly when the peer's write side
    /// died first.
    pub fn notify_closed(&self) {
        self.closed.notify_one();
    }

    /// Resolves once teardown has been initiated.
    pub async fn wait_closed(&self) {
        self.closed.notified().await;
    }

    /// Whether this session is subscribed to a channel.
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains(channel)
    }

    /// Snapshot of the session's subscriptions.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.iter().map(|c| c.clone()).collect()
    }

    pub(crate) fn add_subscription(&self, channel: &str) {
        self.subscriptions.insert(channel.to_string());
    }

    pub(crate) fn remove_subscription(&self, channel: &str) {
        self.subscriptions.remove(channel);
    }

    pub(crate) fn clear_subscriptions(&self) {
        self.subscriptions.clear();
    }
}
