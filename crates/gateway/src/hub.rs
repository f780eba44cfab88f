//! Process-wide session registry and channel broadcaster.
//!
//! The hub owns three mappings behind one reader/writer lock: the live
//! session set, per-user connection counts, and per-channel subscriber
//! sets. Mutations are serialised by the write half; the broadcast path
//! takes the read half only long enough to snapshot a subscriber set.
//! No send ever happens under the lock, so a stuck socket cannot block
//! registration, subscription churn, or other channels' broadcasts.

use crate::error::{GatewayError, Result};
use crate::protocol::Frame;
use crate::session::{Session, SessionId};
use axum::extract::ws::{Message, Utf8Bytes};
use metrics::counter;
use parking_lot::RwLock;
use serde_json::value::RawValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Registry of live sessions and their channel subscriptions.
pub struct Hub {
    /// 0 means no per-user limit.
    max_connections_per_user: usize,
    inner: RwLock<HubInner>,
}

#[derive(Default)]
struct HubInner {
    sessions: HashMap<SessionId, Arc<Session>>,
    connections_per_user: HashMap<String, usize>,
    channel_subscribers: HashMap<String, HashSet<SessionId>>,
}

impl Hub {
    /// Create a hub with the given per-user connection limit (0 = none).
    pub fn new(max_connections_per_user: usize) -> Self {
        Self {
            max_connections_per_user,
            inner: RwLock::new(HubInner::default()),
        }
    }

    /// Add a session to the live set, enforcing the per-user limit.
    ///
    /// The count increments atomically with insertion, so concurrent
    /// registrations cannot overshoot the limit.
    pub fn register(&self, session: Arc<Session>) -> Result<()> {
        let mut inner = self.inner.write();

        let ajaib_id = session.ajaib_id().to_string();
        if !ajaib_id.is_empty() && self.max_connections_per_user > 0 {
            let current = inner.connections_per_user.get(&ajaib_id).copied().unwrap_or(0);
            if current >= self.max_connections_per_user {
                warn!(
                    %ajaib_id,
                    current,
                    max = self.max_connections_per_user,
                    "connection limit reached for user"
                );
                return Err(GatewayError::ConnectionLimit);
            }
        }

        if !ajaib_id.is_empty() {
            *inner.connections_per_user.entry(ajaib_id.clone()).or_insert(0) += 1;
        }
        let client_id = session.id();
        inner.sessions.insert(client_id, session);

        debug!(%client_id, %ajaib_id, "session registered");
        Ok(())
    }

    /// Remove a session from the live set and every subscriber set, then
    /// close its outbound queue. Idempotent: a second call is a no-op.
    ///
    /// Returns the channels the session was still subscribed to so the
    /// caller can release its tracker registrations.
    pub fn unregister(&self, session: &Session) -> Vec<String> {
        let channels;
        {
            let mut inner = self.inner.write();

            if inner.sessions.remove(&session.id()).is_none() {
                return Vec::new();
            }

            let ajaib_id = session.ajaib_id();
            if !ajaib_id.is_empty() {
                if let Some(count) = inner.connections_per_user.get_mut(ajaib_id) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        inner.connections_per_user.remove(ajaib_id);
                    }
                }
            }

            channels = session.subscriptions();
            for channel in &channels {
                if let Some(subscribers) = inner.channel_subscribers.get_mut(channel) {
                    subscribers.remove(&session.id());
                    if subscribers.is_empty() {
                        inner.channel_subscribers.remove(channel);
                    }
                }
            }
            session.clear_subscriptions();
        }

        session.close_queue();

        debug!(client_id = %session.id(), ajaib_id = %session.ajaib_id(), "session unregistered");
        channels
    }

    /// Subscribe a registered session to a channel.
    pub fn subscribe(&self, session: &Arc<Session>, channel: &str) -> Result<()> {
        let mut inner = self.inner.write();

        if !inner.sessions.contains_key(&session.id()) {
            return Err(GatewayError::NotRegistered);
        }

        inner
            .channel_subscribers
            .entry(channel.to_string())
            .or_default()
            .insert(session.id());
        session.add_subscription(channel);

        debug!(
            client_id = %session.id(),
            channel,
            subscribers = inner.channel_subscribers.get(channel).map(|s| s.len()).unwrap_or(0),
            "session subscribed to channel"
        );
        Ok(())
    }

    /// Remove a session's subscription to a channel, deleting the channel
    /// entry when its subscriber set becomes empty.
    pub fn unsubscribe(&self, session: &Session, channel: &str) {
        let mut inner = self.inner.write();

        if let Some(subscribers) = inner.channel_subscribers.get_mut(channel) {
            subscribers.remove(&session.id());
            if subscribers.is_empty() {
                inner.channel_subscribers.remove(channel);
            }
        }
        session.remove_subscription(channel);

        debug!(client_id = %session.id(), channel, "session unsubscribed from channel");
    }

    /// Broadcast a payload to every subscriber of a channel.
    ///
    /// The frame is encoded once; each recipient gets a non-blocking
    /// enqueue, and a full queue drops the frame for that recipient only.
    /// Unknown channels return immediately.
    pub fn broadcast(&self, channel: &str, data: Box<RawValue>) {
        let recipients: Vec<Arc<Session>> = {
            let inner = self.inner.read();
            let Some(subscribers) = inner.channel_subscribers.get(channel) else {
                return;
            };
            subscribers
                .iter()
                .filter_map(|id| inner.sessions.get(id).cloned())
                .collect()
        };

        let frame = Frame::publication(channel, data);
        let encoded = match frame.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(channel, error = %e, "failed to encode broadcast frame");
                return;
            }
        };
        let text: Utf8Bytes = encoded.into();

        counter!("gateway_broadcasts_total").increment(1);

        for session in recipients {
            match session.enqueue(Message::Text(text.clone())) {
                Ok(()) => {}
                Err(GatewayError::SendQueueFull) => {
                    counter!("gateway_frames_dropped_total").increment(1);
                    warn!(
                        client_id = %session.id(),
                        channel,
                        "session send queue full, dropping frame"
                    );
                }
                Err(_) => {
                    // Queue already closed by teardown; unregister will
                    // remove the session from the subscriber set shortly.
                    debug!(client_id = %session.id(), channel, "send queue closed");
                }
            }
        }
    }

    /// Number of live sessions.
    pub fn client_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Subscriber ids of a channel.
    pub fn subscribers_of(&self, channel: &str) -> Vec<SessionId> {
        self.inner
            .read()
            .channel_subscribers
            .get(channel)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of live connections for a user.
    pub fn connections_of(&self, ajaib_id: &str) -> usize {
        self.inner
            .read()
            .connections_per_user
            .get(ajaib_id)
            .copied()
            .unwrap_or(0)
    }

    /// Whether a user may establish one more connection.
    pub fn can_user_connect(&self, ajaib_id: &str) -> bool {
        if ajaib_id.is_empty() || self.max_connections_per_user == 0 {
            return true;
        }
        self.connections_of(ajaib_id) < self.max_connections_per_user
    }

    /// Snapshot of all live sessions, for shutdown.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.read().sessions.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SEND_QUEUE_CAPACITY;

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_string()).unwrap()
    }

    fn new_session(ajaib_id: &str) -> (Arc<Session>, tokio::sync::mpsc::Receiver<Message>) {
        Session::new(ajaib_id.to_string(), format!("C{}", ajaib_id))
    }

    #[tokio::test]
    async fn register_enforces_per_user_limit() {
        let hub = Hub::new(2);
        let (a, _rx_a) = new_session("111");
        let (b, _rx_b) = new_session("111");
        let (c, _rx_c) = new_session("111");
        let (other, _rx_o) = new_session("222");

        hub.register(a).unwrap();
        hub.register(b).unwrap();
        assert!(!hub.can_user_connect("111"));
        assert!(matches!(hub.register(c), Err(GatewayError::ConnectionLimit)));
        // A different user is unaffected.
        hub.register(other).unwrap();
        assert_eq!(hub.connections_of("111"), 2);
        assert_eq!(hub.connections_of("222"), 1);
    }

    #[tokio::test]
    async fn zero_limit_means_no_limit() {
        let hub = Hub::new(0);
        for _ in 0..10 {
            let (s, _rx) = new_session("111");
            hub.register(s).unwrap();
        }
        assert!(hub.can_user_connect("111"));
        assert_eq!(hub.connections_of("111"), 10);
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_cleans_everything() {
        let hub = Hub::new(0);
        let (s, _rx) = new_session("111");
        hub.register(s.clone()).unwrap();
        hub.subscribe(&s, "user:111:margin").unwrap();
        hub.subscribe(&s, "user:111:position").unwrap();

        let mut channels = hub.unregister(&s);
        channels.sort();
        assert_eq!(channels, vec!["user:111:margin", "user:111:position"]);
        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.connections_of("111"), 0);
        assert!(hub.subscribers_of("user:111:margin").is_empty());
        assert!(hub.subscribers_of("user:111:position").is_empty());

        // Second call observes the same final state and reports no channels.
        assert!(hub.unregister(&s).is_empty());
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_requires_registration() {
        let hub = Hub::new(0);
        let (s, _rx) = new_session("111");
        assert!(matches!(
            hub.subscribe(&s, "user:111:margin"),
            Err(GatewayError::NotRegistered)
        ));
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_restores_state() {
        let hub = Hub::new(0);
        let (s, _rx) = new_session("111");
        hub.register(s.clone()).unwrap();

        hub.subscribe(&s, "user:111:margin").unwrap();
        assert_eq!(hub.subscribers_of("user:111:margin"), vec![s.id()]);
        assert!(s.is_subscribed("user:111:margin"));

        hub.unsubscribe(&s, "user:111:margin");
        assert!(hub.subscribers_of("user:111:margin").is_empty());
        assert!(!s.is_subscribed("user:111:margin"));
        assert!(s.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_only_channel_subscribers() {
        let hub = Hub::new(0);
        let (a, mut rx_a) = new_session("111");
        let (b, mut rx_b) = new_session("222");
        hub.register(a.clone()).unwrap();
        hub.register(b.clone()).unwrap();
        hub.subscribe(&a, "user:111:margin").unwrap();
        hub.subscribe(&b, "user:222:margin").unwrap();

        hub.broadcast("user:111:margin", raw(r#"{"margin_balance":1.0}"#));

        let got = rx_a.recv().await.unwrap();
        match got {
            Message::Text(text) => {
                assert!(text.as_str().contains(r#""channel":"user:111:margin""#));
                assert!(text.as_str().contains(r#""margin_balance":1.0"#));
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_unknown_channel_is_a_cheap_miss() {
        let hub = Hub::new(0);
        hub.broadcast("user:999:margin", raw("{}"));
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn full_recipient_does_not_stall_others() {
        let hub = Hub::new(0);
        let (healthy, mut rx_healthy) = new_session("111");
        let (stuck, _rx_stuck) = new_session("111");
        hub.register(healthy.clone()).unwrap();
        hub.register(stuck.clone()).unwrap();
        hub.subscribe(&healthy, "user:111:margin").unwrap();
        hub.subscribe(&stuck, "user:111:margin").unwrap();

        // Fill the stuck session's queue.
        for _ in 0..SEND_QUEUE_CAPACITY {
            stuck.enqueue(Message::Text("x".to_string().into())).unwrap();
        }

        for i in 0..1000u32 {
            hub.broadcast("user:111:margin", raw(&format!(r#"{{"seq":{}}}"#, i)));
        }

        // Healthy session got a queue-capacity worth in FIFO order.
        for i in 0..SEND_QUEUE_CAPACITY as u32 {
            match rx_healthy.recv().await.unwrap() {
                Message::Text(text) => {
                    assert!(text.as_str().contains(&format!(r#"{{"seq":{}}}"#, i)))
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }
}
