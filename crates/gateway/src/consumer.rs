//! Kafka consumer loop.
//!
//! Wraps an rdkafka `StreamConsumer` with manual offset commits. Offsets
//! are committed after every record, including undecodable ones: the
//! group is at-least-once and retrying an unparseable record would stall
//! it.

use crate::config::KafkaSettings;
use crate::error::Result;
use crate::ingress::Dispatcher;
use metrics::counter;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::ClientConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Consumes the upstream user-state topics and feeds the dispatcher.
pub struct IngressConsumer {
    consumer: StreamConsumer,
    dispatcher: Arc<Dispatcher>,
}

impl IngressConsumer {
    /// Create the consumer and subscribe to the configured topics.
    pub fn new(settings: &KafkaSettings, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", settings.brokers.join(","))
            .set("group.id", &settings.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", initial_offset(&settings.initial_offset))
            .set("session.timeout.ms", settings.session_timeout.as_millis().to_string())
            .set(
                "heartbeat.interval.ms",
                settings.heartbeat_interval.as_millis().to_string(),
            )
            .create()?;

        let topics: Vec<&str> = settings.topics.iter().map(|t| t.as_str()).collect();
        consumer.subscribe(&topics)?;

        info!(
            brokers = %settings.brokers.join(","),
            group = %settings.consumer_group,
            topics = ?settings.topics,
            "kafka consumer created"
        );

        Ok(Self { consumer, dispatcher })
    }

    /// Run until the shutdown channel fires. Fetch errors are logged and
    /// retried by the client's own backoff; they never end the loop.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!("kafka consumer started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("kafka consumer received shutdown signal");
                    break;
                }

                result = self.consumer.recv() => {
                    match result {
                        Ok(message) => {
                            let topic = message.topic().to_string();
                            let payload = message.payload().unwrap_or_default();

                            if let Err(e) = self.dispatcher.dispatch(&topic, payload).await {
                                counter!("gateway_kafka_decode_errors_total").increment(1);
                                error!(
                                    %topic,
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "skipping undecodable record"
                                );
                            } else {
                                counter!("gateway_kafka_messages_total").increment(1);
                            }

                            // Commit even on dispatch errors so a poison
                            // record cannot stall the group.
                            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                                warn!(
                                    %topic,
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "offset commit failed"
                                );
                            }
                        }
                        Err(e) => {
                            counter!("gateway_kafka_fetch_errors_total").increment(1);
                            error!(error = %e, "kafka fetch error");
                        }
                    }
                }
            }
        }

        info!("kafka consumer stopped");
        Ok(())
    }
}

fn initial_offset(configured: &str) -> &'static str {
    match configured {
        "earliest" => "earliest",
        _ => "latest",
    }
}
