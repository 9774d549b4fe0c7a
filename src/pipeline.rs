use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::RoomAuthorizer;
use crate::broadcast::{Broadcaster, ConnectionId};
use crate::cache::PipelineCache;
use crate::config::Config;
use crate::db::{self, DbPool};
use crate::error::{AppError, AppResult};
use crate::fanout::FanoutConsumer;
use crate::history::HistoryReader;
use crate::kafka::{RoomEventConsumer, RoomEventProducer};
use crate::lock::LeaderLock;
use crate::message::{ChatMessage, RoomRef};
use crate::presence::PresenceReconciler;
use crate::writer::BatchWriter;

/// Connectivity and leadership state of this process, owned by the
/// supervisor and injected into each component.
///
/// Init-on-startup (everything false until proven), mutated on lock
/// transitions and connectivity probes, torn down with the supervisor.
/// Flags are observational: components act on their own call results and
/// record the outcome here for the health surface.
pub struct PipelineStatus {
    log_connected: AtomicBool,
    cache_connected: AtomicBool,
    store_connected: AtomicBool,
    broadcaster_connected: AtomicBool,
    is_leader: AtomicBool,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self {
            log_connected: AtomicBool::new(false),
            cache_connected: AtomicBool::new(false),
            store_connected: AtomicBool::new(false),
            broadcaster_connected: AtomicBool::new(false),
            is_leader: AtomicBool::new(false),
        }
    }

    pub fn log_connected(&self) -> bool {
        self.log_connected.load(Ordering::Relaxed)
    }

    pub fn set_log_connected(&self, value: bool) {
        self.log_connected.store(value, Ordering::Relaxed);
    }

    pub fn cache_connected(&self) -> bool {
        self.cache_connected.load(Ordering::Relaxed)
    }

    pub fn set_cache_connected(&self, value: bool) {
        self.cache_connected.store(value, Ordering::Relaxed);
    }

    pub fn store_connected(&self) -> bool {
        self.store_connected.load(Ordering::Relaxed)
    }

    pub fn set_store_connected(&self, value: bool) {
        self.store_connected.store(value, Ordering::Relaxed);
    }

    pub fn broadcaster_connected(&self) -> bool {
        self.broadcaster_connected.load(Ordering::Relaxed)
    }

    pub fn set_broadcaster_connected(&self, value: bool) {
        self.broadcaster_connected.store(value, Ordering::Relaxed);
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    pub fn set_is_leader(&self, value: bool) {
        self.is_leader.store(value, Ordering::Relaxed);
    }
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Acknowledgment returned to the entry point for an accepted message.
///
/// `Queued` is the normal path: accepted for publishing, durability follows
/// asynchronously. `Stored` means the log was unavailable and the message
/// went through the synchronous direct-write fallback. Either way the
/// sender's success ack does not wait on the batch writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAck {
    Queued,
    Stored,
}

/// Long-lived owner of the pipeline: shared clients, status flags and the
/// background stages (fanout consumer, batch writer, presence reconciler,
/// broadcast listener).
pub struct PipelineSupervisor {
    pub config: Arc<Config>,
    pub pool: Arc<DbPool>,
    pub cache: Arc<Mutex<PipelineCache>>,
    pub producer: Arc<RoomEventProducer>,
    pub broadcaster: Arc<Broadcaster>,
    pub status: Arc<PipelineStatus>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PipelineSupervisor {
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let status = Arc::new(PipelineStatus::new());

        let pool = Arc::new(db::create_pool(&config).await?);
        status.set_store_connected(true);
        info!("Connected to durable store");

        let cache = tokio::time::timeout(Duration::from_secs(10), PipelineCache::new(&config))
            .await
            .map_err(|_| anyhow::anyhow!("Cache connection timed out after 10 seconds"))??;
        let cache = Arc::new(Mutex::new(cache));
        status.set_cache_connected(true);
        info!("Connected to cache service");

        let producer = Arc::new(RoomEventProducer::new(&config.kafka, status.clone())?);

        let broadcaster = Arc::new(Broadcaster::new(
            cache.clone(),
            config.broadcast_channel.clone(),
            status.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            pool,
            cache,
            producer,
            broadcaster,
            status,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Spawn the background stages. Each task runs until [`shutdown`] fires.
    pub async fn spawn_pipeline(&self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        // Broadcast listener: delivers pub/sub frames to local sessions.
        handles.push(tokio::spawn(
            self.broadcaster
                .clone()
                .run_listener(self.config.redis_url.clone()),
        ));

        // Fanout consumer: only with the durable log enabled; without it the
        // submit path is direct-write and there is nothing to consume.
        if self.config.kafka.enabled {
            let consumer = RoomEventConsumer::new(&self.config.kafka)?;
            let fanout = FanoutConsumer::new(
                consumer,
                self.cache.clone(),
                self.pool.clone(),
                self.status.clone(),
                self.config.writer.deployment.clone(),
                self.config.logging.clone(),
            );
            handles.push(tokio::spawn(fanout.run(self.shutdown_rx.clone())));
        }

        // Batch writer: runs on every process; the leadership lock decides
        // which one actually writes. The lock gets its own connection so a
        // wedged cache mutex cannot block leadership housekeeping.
        let lock_conn = redis::Client::open(self.config.redis_url.as_str())
            .context("Failed to parse cache URL for leadership lock")?
            .get_connection_manager()
            .await
            .context("Failed to connect leadership lock")?;
        let lock = LeaderLock::new(
            lock_conn,
            self.config.redis_key_prefixes.leader_lock.clone(),
            Duration::from_secs(self.config.writer.leader_ttl_secs),
        );
        let writer = BatchWriter::new(
            self.cache.clone(),
            lock,
            self.pool.clone(),
            self.status.clone(),
            self.config.writer.deployment.clone(),
            self.config.writer.batch_max,
        );
        handles.push(tokio::spawn(writer.run(
            Duration::from_secs(self.config.writer.tick_secs),
            self.shutdown_rx.clone(),
        )));

        // Presence reconciler.
        let reconciler = PresenceReconciler::new(
            self.cache.clone(),
            self.pool.clone(),
            self.broadcaster.clone(),
        );
        handles.push(tokio::spawn(reconciler.run(
            Duration::from_secs(self.config.presence.sweep_secs),
            self.shutdown_rx.clone(),
        )));

        Ok(handles)
    }

    /// Entry-point glue for a submitted message.
    ///
    /// Validates synchronously (malformed or oversized payloads never enter
    /// the pipeline), authorizes, broadcasts optimistically to the room, then
    /// publishes to the durable log. A failed publish degrades to a
    /// synchronous deduplicated direct write; the caller's ack never waits on
    /// the asynchronous durability path.
    pub async fn submit_message(
        &self,
        authz: &impl RoomAuthorizer,
        message: ChatMessage,
    ) -> AppResult<SubmitAck> {
        message
            .validate()
            .map_err(|e| AppError::validation(e.to_string()))?;
        let room = message
            .room()
            .map_err(|e| AppError::validation(e.to_string()))?;

        if let Some(sender) = message.sender_id {
            if !authz.is_member(sender, &room).await? {
                return Err(AppError::forbidden("sender is not a member of the room"));
            }
        }

        crate::metrics::MESSAGES_SUBMITTED_TOTAL.inc();

        // Fast path first: connected clients see the message before any
        // durability work. Visibility is not durability: the log path and
        // this broadcast race independently.
        let payload = serde_json::to_value(&message)?;
        if let Err(e) = self
            .broadcaster
            .broadcast(&room.id().to_string(), "message.created", payload)
            .await
        {
            warn!(error = %e, message_id = %message.id, "Optimistic broadcast failed");
        }

        if self.producer.publish(&message).await {
            return Ok(SubmitAck::Queued);
        }

        // Log unavailable: keep the message durable via the synchronous
        // fallback. Insert skips duplicates, so a publish that timed out
        // after the broker stored it stays harmless.
        db::insert_message(&self.pool, &message).await?;
        self.status.set_store_connected(true);
        crate::metrics::MESSAGES_DIRECT_WRITE_TOTAL.inc();
        info!(message_id = %message.id, "Message stored via direct write (log unavailable)");
        Ok(SubmitAck::Stored)
    }

    /// Subscribe a connection to a room after checking capability with the
    /// external authorization layer.
    pub async fn join_room(
        &self,
        authz: &impl RoomAuthorizer,
        user_id: Uuid,
        connection_id: &ConnectionId,
        room: &RoomRef,
    ) -> AppResult<()> {
        let allowed = match room {
            RoomRef::Channel(channel_id) => authz.has_access(user_id, *channel_id).await?,
            RoomRef::Direct(_) => authz.is_member(user_id, room).await?,
        };
        if !allowed {
            return Err(AppError::forbidden("no access to this room"));
        }

        if !self
            .broadcaster
            .join_room(connection_id, &room.id().to_string())
            .await
        {
            return Err(AppError::broadcast("connection is not registered"));
        }
        Ok(())
    }

    /// Read path for history endpoints.
    pub fn history(&self) -> HistoryReader {
        HistoryReader::new(self.cache.clone(), self.pool.clone(), self.status.clone())
    }

    /// Signal all background stages to stop and flush the producer. The
    /// writer releases leadership on its way out so the rest of the fleet
    /// does not wait out our lock TTL.
    pub async fn shutdown(&self) {
        info!("Pipeline supervisor shutting down");
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.producer.flush(Duration::from_secs(5)).await {
            warn!(error = %e, "Producer flush failed during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_starts_disconnected_and_follower() {
        let status = PipelineStatus::new();
        assert!(!status.log_connected());
        assert!(!status.cache_connected());
        assert!(!status.store_connected());
        assert!(!status.broadcaster_connected());
        assert!(!status.is_leader());
    }

    #[test]
    fn leadership_transitions_are_visible() {
        let status = PipelineStatus::new();
        status.set_is_leader(true);
        assert!(status.is_leader());
        // Write failure demotes back to follower.
        status.set_is_leader(false);
        assert!(!status.is_leader());
    }
}
