use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::cache::PipelineCache;
use crate::config::LoggingConfig;
use crate::db::{self, DbPool};
use crate::kafka::{metrics, RoomEventConsumer, RoomEventEnvelope};
use crate::pipeline::PipelineStatus;
use crate::utils::log_safe_id;

/// Fanout stage: reads the durable log strictly in partition order and, per
/// record, seeds the room history cache and appends to the batch-write queue.
///
/// Sockets were already notified optimistically at submit time; broadcasting
/// again here would deliver every message twice, so this stage never touches
/// the realtime path. When the cache service is unreachable the record falls
/// back to a deduplicated direct write so nothing is lost with the
/// accelerator down.
pub struct FanoutConsumer {
    consumer: RoomEventConsumer,
    cache: Arc<Mutex<PipelineCache>>,
    pool: Arc<DbPool>,
    status: Arc<PipelineStatus>,
    deployment: String,
    logging: LoggingConfig,
}

impl FanoutConsumer {
    pub fn new(
        consumer: RoomEventConsumer,
        cache: Arc<Mutex<PipelineCache>>,
        pool: Arc<DbPool>,
        status: Arc<PipelineStatus>,
        deployment: String,
        logging: LoggingConfig,
    ) -> Self {
        Self {
            consumer,
            cache,
            pool,
            status,
            deployment,
            logging,
        }
    }

    /// Room label for log lines: raw id only when the operator opted in.
    fn room_label(&self, envelope: &RoomEventEnvelope) -> String {
        if self.logging.enable_user_identifiers {
            envelope.room_id.to_string()
        } else {
            log_safe_id(&envelope.room_id.to_string(), &self.logging.hash_salt)
        }
    }

    /// Consume until shutdown. Offsets are committed after the side effects
    /// of each record, giving at-least-once semantics: a crash between side
    /// effect and commit redelivers, and both side effects are safe under
    /// duplicates (cache push is capped, queue append relies on the writer's
    /// id-keyed skip-duplicate insert).
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!("Fanout consumer started");
        loop {
            let received = tokio::select! {
                received = self.consumer.recv() => received,
                _ = shutdown.changed() => {
                    info!("Fanout consumer shutting down");
                    return;
                }
            };

            match received {
                Ok(Some(envelope)) => {
                    match self.process(&envelope).await {
                        Ok(()) => metrics::FANOUT_CONSUME_SUCCESS.inc(),
                        Err(e) => {
                            // Logged and skipped rather than retried forever:
                            // one poison record must not stall its partition.
                            metrics::FANOUT_CONSUME_SKIPPED.inc();
                            error!(
                                error = %e,
                                message_id = %envelope.message.id,
                                "Fanout processing failed, skipping record"
                            );
                        }
                    }
                    if let Err(e) = self.consumer.commit() {
                        error!(error = %e, "Failed to commit consumer offsets");
                    }
                }
                Ok(None) => {
                    // Malformed record, already logged. Commit past it.
                    metrics::FANOUT_CONSUME_SKIPPED.inc();
                    if let Err(e) = self.consumer.commit() {
                        error!(error = %e, "Failed to commit consumer offsets");
                    }
                }
                Err(e) => {
                    self.status.set_log_connected(false);
                    error!(error = %e, "Log consumer error, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn process(&mut self, envelope: &RoomEventEnvelope) -> Result<()> {
        envelope.validate().context("Invalid room event")?;
        self.status.set_log_connected(true);

        let message = &envelope.message;
        tracing::debug!(
            message_id = %message.id,
            room = %self.room_label(envelope),
            "Processing room event"
        );

        // Seed the cache and enqueue for the durable write. Both steps go
        // through the cache service; either failing routes this record to
        // the direct-write fallback.
        let cache_result = {
            let mut cache = self.cache.lock().await;
            match cache.seed_room_history(&envelope.room_id, message).await {
                Ok(()) => cache.queue_append(&self.deployment, message).await,
                Err(e) => Err(e),
            }
        };

        match cache_result {
            Ok(()) => {
                self.status.set_cache_connected(true);
                Ok(())
            }
            Err(e) => {
                self.status.set_cache_connected(false);
                warn!(
                    error = %e,
                    message_id = %message.id,
                    "Cache service unavailable, falling back to direct write"
                );

                // Deduplicated direct write: the same record may have been
                // half-processed on a previous delivery.
                if db::message_exists(&self.pool, &message.id).await? {
                    return Ok(());
                }
                db::insert_message(&self.pool, message).await?;
                self.status.set_store_connected(true);
                crate::metrics::MESSAGES_DIRECT_WRITE_TOTAL.inc();
                info!(
                    message_id = %message.id,
                    "Message stored via direct write (cache down)"
                );
                Ok(())
            }
        }
    }
}
