//! Subscription tracker: the ingress path's `cfx_user_id -> ajaib_id` index.
//!
//! An entry exists iff at least one session with that CFX user id is
//! subscribed to at least one user channel. Entries are reference-counted
//! per CFX user id so that one session of a user unsubscribing does not
//! drop routing for another session of the same user that is still
//! subscribed.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

struct TrackedUser {
    ajaib_id: String,
    refs: usize,
}

/// Reference-counted `cfx_user_id -> ajaib_id` index.
#[derive(Default)]
pub struct SubscriptionTracker {
    users: RwLock<HashMap<String, TrackedUser>>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one user-channel subscription for a CFX user id.
    pub fn register(&self, cfx_user_id: &str, ajaib_id: &str) {
        let mut users = self.users.write();
        let entry = users.entry(cfx_user_id.to_string()).or_insert(TrackedUser {
            ajaib_id: ajaib_id.to_string(),
            refs: 0,
        });
        entry.ajaib_id = ajaib_id.to_string();
        entry.refs += 1;

        debug!(cfx_user_id, ajaib_id, refs = entry.refs, "tracker registration added");
    }

    /// Release one user-channel subscription for a CFX user id. The mapping
    /// is removed only when the last subscription is released; releasing an
    /// unknown id is a no-op.
    pub fn unregister(&self, cfx_user_id: &str) {
        let mut users = self.users.write();
        if let Some(entry) = users.get_mut(cfx_user_id) {
            entry.refs = entry.refs.saturating_sub(1);
            let remaining = entry.refs;
            if remaining == 0 {
                users.remove(cfx_user_id);
            }
            debug!(cfx_user_id, refs = remaining, "tracker registration released");
        }
    }

    /// Look up the Ajaib id routing traffic for a CFX user id.
    pub fn lookup(&self, cfx_user_id: &str) -> Option<String> {
        self.users.read().get(cfx_user_id).map(|u| u.ajaib_id.clone())
    }

    /// Number of CFX user ids with at least one active subscription.
    pub fn active_user_count(&self) -> usize {
        self.users.read().len()
    }
}
