use anyhow::{Context, Result};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use tracing::{info, warn};

use super::types::RoomEventEnvelope;
use crate::config::KafkaConfig;

/// Consumer reading room events for the fanout stage.
///
/// One consumer group across all processes, so each partition (and with it
/// each room) is read by exactly one worker at a time, in order. Offsets are
/// committed manually after the fanout side effects; a crash before commit
/// redelivers, which downstream handles idempotently.
pub struct RoomEventConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl RoomEventConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = super::base_client_config(config)
            .set("group.id", &config.consumer_group)
            // Offsets are committed by the fanout loop, never automatically
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            // Session management
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .context("Failed to create log consumer")?;

        consumer
            .subscribe(&[&config.topic])
            .context("Failed to subscribe to room-events topic")?;

        info!(
            topic = %config.topic,
            group = %config.consumer_group,
            "Durable log consumer initialized"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }

    /// Receive the next room event in partition order.
    ///
    /// Returns `Ok(None)` for records that cannot be interpreted (empty or
    /// undecodable payload); those are logged and the caller commits past
    /// them, since redelivering a malformed record can never succeed.
    /// Returns `Err` for broker-level failures.
    pub async fn recv(&self) -> Result<Option<RoomEventEnvelope>> {
        let record = self
            .consumer
            .recv()
            .await
            .context("Log consumer receive failed")?;

        let Some(payload) = record.payload() else {
            warn!(
                topic = %self.topic,
                partition = record.partition(),
                offset = record.offset(),
                "Skipping record with empty payload"
            );
            return Ok(None);
        };

        match serde_json::from_slice::<RoomEventEnvelope>(payload) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                warn!(
                    error = %e,
                    partition = record.partition(),
                    offset = record.offset(),
                    "Skipping undecodable room event"
                );
                Ok(None)
            }
        }
    }

    /// Commit consumed offsets. Called only after the fanout side effects
    /// for the received record have been applied (or deliberately skipped).
    pub fn commit(&self) -> Result<()> {
        self.consumer
            .commit_consumer_state(CommitMode::Sync)
            .context("Failed to commit consumer offsets")?;
        Ok(())
    }
}
