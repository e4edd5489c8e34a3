use super::{Sample, SourceError};
use crate::config::KafkaConfig;
use crate::error::Result;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Create a Kafka consumer configured for the PM topic
pub fn create_consumer(
    brokers: &str,
    group_id: &str,
    auto_offset_reset: &str,
) -> Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", group_id)
        .set("bootstrap.servers", brokers)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", auto_offset_reset)
        .set("session.timeout.ms", "10000")
        .set("reconnect.backoff.max.ms", "2000")
        .set("enable.partition.eof", "false")
        .create()?;

    Ok(consumer)
}

/// Live PM feed. Gives up with [`SourceError::Exhausted`] when the topic stays
/// quiet for longer than the configured period.
pub struct LiveSource {
    consumer: StreamConsumer,
    topic: String,
    quiet_period: Duration,
}

impl LiveSource {
    pub fn connect(config: &KafkaConfig, topic: &str) -> Result<Self> {
        let consumer = create_consumer(&config.brokers, &config.group_id, &config.auto_offset_reset)?;
        consumer.subscribe(&[topic])?;
        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            topic = %topic,
            "subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            topic: topic.to_string(),
            quiet_period: config.quiet_period(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn next_sample(&mut self) -> std::result::Result<Sample, SourceError> {
        let deadline = Instant::now() + self.quiet_period;

        loop {
            let message = match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Err(_) => {
                    return Err(SourceError::Exhausted {
                        topic: self.topic.clone(),
                        quiet_period: self.quiet_period,
                    })
                }
                Ok(Err(e)) => return Err(SourceError::Unavailable(e.to_string())),
                Ok(Ok(message)) => message,
            };

            let payload = match message.payload() {
                Some(p) => p,
                None => {
                    warn!(topic = %self.topic, "received message with no payload");
                    continue;
                }
            };

            match serde_json::from_slice::<Value>(payload) {
                Ok(value) => return Ok(Sample::new(value)),
                Err(e) => {
                    debug!(topic = %self.topic, error = %e, "dropping non-JSON payload");
                    if let Ok(s) = std::str::from_utf8(payload) {
                        debug!("Raw payload: {}", s);
                    }
                }
            }
        }
    }
}
