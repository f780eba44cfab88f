//! Ingress dispatcher: bus records → channel broadcasts.
//!
//! Demultiplexes `(topic, key, value)` tuples from the consumer, looks up
//! the subscribing user in the tracker, applies the currency transformer,
//! and hands the result to the hub. A record whose CFX user id has no
//! active subscriber is dropped before any decoding beyond the envelope.

use crate::channel::{user_channel, ChannelKind};
use crate::error::Result;
use crate::hub::Hub;
use crate::tracker::SubscriptionTracker;
use crate::transformer::{Transformer, UserMargin, UserPosition};
use metrics::counter;
use serde_json::value::RawValue;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Kafka topic carrying user margin snapshots.
pub const TOPIC_USER_MARGIN: &str = "com.ajaib.coin.cfx.streamer.futures.message.UserMargin";

/// Kafka topic carrying user position snapshots.
pub const TOPIC_USER_POSITION: &str = "com.ajaib.coin.cfx.streamer.futures.message.UserPosition";

/// Routes decoded bus records to hub broadcasts.
pub struct Dispatcher {
    hub: Arc<Hub>,
    tracker: Arc<SubscriptionTracker>,
    transformer: Transformer,
}

impl Dispatcher {
    pub fn new(hub: Arc<Hub>, tracker: Arc<SubscriptionTracker>, transformer: Transformer) -> Self {
        Self {
            hub,
            tracker,
            transformer,
        }
    }

    /// Handle one bus record. Unknown topics are logged and ignored; a
    /// decode error is returned so the consumer can log and skip the
    /// record while still committing its offset.
    pub async fn dispatch(&self, topic: &str, value: &[u8]) -> Result<()> {
        match topic {
            TOPIC_USER_MARGIN => self.handle_margin(value).await,
            TOPIC_USER_POSITION => self.handle_position(value).await,
            _ => {
                warn!(topic, "unknown topic");
                Ok(())
            }
        }
    }

    async fn handle_margin(&self, value: &[u8]) -> Result<()> {
        let margin: UserMargin = serde_json::from_slice(value)?;

        let Some(ajaib_id) = self.tracker.lookup(&margin.cfx_user_id) else {
            // No active subscribers for this user.
            return Ok(());
        };

        let payload = match self.transformer.transform_margin(&margin).await {
            Ok(Some(converted)) => serde_json::value::to_raw_value(&converted)?,
            Ok(None) => serde_json::from_slice::<Box<RawValue>>(value)?,
            Err(e) => {
                counter!("gateway_transform_errors_total").increment(1);
                error!(cfx_user_id = %margin.cfx_user_id, error = %e, "dropping margin record, conversion failed");
                return Ok(());
            }
        };

        let channel = user_channel(&ajaib_id, ChannelKind::Margin);
        self.hub.broadcast(&channel, payload);

        debug!(
            cfx_user_id = %margin.cfx_user_id,
            %ajaib_id,
            %channel,
            asset = %margin.asset,
            "broadcasted user margin"
        );
        Ok(())
    }

    async fn handle_position(&self, value: &[u8]) -> Result<()> {
        let position: UserPosition = serde_json::from_slice(value)?;

        let Some(ajaib_id) = self.tracker.lookup(&position.cfx_user_id) else {
            return Ok(());
        };

        let payload = match self.transformer.transform_position(&position).await {
            Ok(Some(converted)) => serde_json::value::to_raw_value(&converted)?,
            Ok(None) => serde_json::from_slice::<Box<RawValue>>(value)?,
            Err(e) => {
                counter!("gateway_transform_errors_total").increment(1);
                error!(cfx_user_id = %position.cfx_user_id, error = %e, "dropping position record, conversion failed");
                return Ok(());
            }
        };

        let channel = user_channel(&ajaib_id, ChannelKind::Position);
        self.hub.broadcast(&channel, payload);

        debug!(
            cfx_user_id = %position.cfx_user_id,
            %ajaib_id,
            %channel,
            symbol = %position.symbol,
            "broadcasted user position"
        );
        Ok(())
    }
}
