use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, error, info, warn};

use super::metrics;
use super::types::RoomEventEnvelope;
use crate::config::KafkaConfig;
use crate::message::ChatMessage;
use crate::pipeline::PipelineStatus;

/// Producer appending room events to the durable log.
///
/// Configured for at-least-once delivery: acks from all in-sync replicas,
/// idempotent writes within a producer session, bounded retries. A publish
/// that times out may still have been stored, so the broker can replay it;
/// downstream consumers absorb replays idempotently.
pub struct RoomEventProducer {
    producer: Arc<FutureProducer>,
    topic: String,
    enabled: bool,
    publish_timeout: Duration,
    status: Arc<PipelineStatus>,
}

impl RoomEventProducer {
    pub fn new(config: &KafkaConfig, status: Arc<PipelineStatus>) -> Result<Self> {
        if !config.enabled {
            info!("Durable log disabled (KAFKA_ENABLED=false); all submits will use the direct-write fallback");
            let producer = super::base_client_config(config)
                .create()
                .context("Failed to create disabled log producer")?;

            return Ok(Self {
                producer: Arc::new(producer),
                topic: config.topic.clone(),
                enabled: false,
                publish_timeout: Duration::from_millis(config.publish_timeout_ms),
                status,
            });
        }

        let producer: FutureProducer = super::base_client_config(config)
            // Reliability
            .set("acks", &config.producer_acks)
            .set(
                "enable.idempotence",
                config.producer_enable_idempotence.to_string(),
            )
            .set("retries", config.producer_retries.to_string())
            // Performance
            .set("compression.type", &config.producer_compression)
            .set("linger.ms", config.producer_linger_ms.to_string())
            // Timeouts
            .set(
                "request.timeout.ms",
                config.producer_request_timeout_ms.to_string(),
            )
            .create()
            .context("Failed to create log producer")?;

        info!(topic = %config.topic, "Durable log producer initialized");

        Ok(Self {
            producer: Arc::new(producer),
            topic: config.topic.clone(),
            enabled: true,
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
            status,
        })
    }

    /// Append a message to the durable log, keyed by its room id.
    ///
    /// Returns false (never an error) when the broker is disabled,
    /// unreachable or slow past the publish timeout. A false return tells the
    /// caller to fall back to a synchronous direct write, so a broker outage
    /// degrades latency but loses nothing.
    pub async fn publish(&self, message: &ChatMessage) -> bool {
        if !self.enabled {
            return false;
        }

        let envelope = match RoomEventEnvelope::message_created(message.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Refusing to publish malformed message");
                return false;
            }
        };

        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, message_id = %envelope.message.id, "Failed to serialize room event");
                return false;
            }
        };

        let key = envelope.partition_key();
        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        let start = std::time::Instant::now();
        match self
            .producer
            .send(record, Timeout::After(self.publish_timeout))
            .await
        {
            Ok((partition, offset)) => {
                metrics::LOG_PUBLISH_SUCCESS.inc();
                metrics::LOG_PUBLISH_LATENCY.observe(start.elapsed().as_secs_f64());
                self.status.set_log_connected(true);

                debug!(
                    partition = partition,
                    offset = offset,
                    message_id = %envelope.message.id,
                    "Room event appended to durable log"
                );
                true
            }
            Err((kafka_err, _)) => {
                metrics::LOG_PUBLISH_FAILURE.inc();
                self.status.set_log_connected(false);

                error!(
                    error = %kafka_err,
                    message_id = %envelope.message.id,
                    topic = %self.topic,
                    "Durable log append failed; caller falls back to direct write"
                );
                false
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for in-flight appends before shutdown.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.producer
            .flush(Timeout::After(timeout))
            .context("Failed to flush log producer")?;
        Ok(())
    }
}

impl Clone for RoomEventProducer {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            topic: self.topic.clone(),
            enabled: self.enabled,
            publish_timeout: self.publish_timeout,
            status: Arc::clone(&self.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RoomRef;
    use uuid::Uuid;

    fn test_config() -> KafkaConfig {
        KafkaConfig {
            enabled: false,
            brokers: "localhost:9092".to_string(),
            topic: "test-room-events".to_string(),
            consumer_group: "test-group".to_string(),
            publish_timeout_ms: 1000,
            producer_acks: "all".to_string(),
            producer_linger_ms: 0,
            producer_retries: 0,
            producer_request_timeout_ms: 1000,
            producer_enable_idempotence: true,
            producer_compression: "none".to_string(),
        }
    }

    #[test]
    fn disabled_producer_creation() {
        let status = Arc::new(PipelineStatus::new());
        let producer = RoomEventProducer::new(&test_config(), status);
        assert!(producer.is_ok());
        assert!(!producer.unwrap().is_enabled());
    }

    #[tokio::test]
    async fn disabled_producer_signals_fallback() {
        let status = Arc::new(PipelineStatus::new());
        let producer = RoomEventProducer::new(&test_config(), status).unwrap();

        let message = ChatMessage::new_text(
            RoomRef::Channel(Uuid::new_v4()),
            Uuid::new_v4(),
            "hello",
        );

        // A disabled broker must route the caller to the direct-write path.
        assert!(!producer.publish(&message).await);
    }
}
