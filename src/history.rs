use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::PipelineCache;
use crate::db::{self, DbPool};
use crate::error::{AppError, AppResult};
use crate::message::{ChatMessage, RoomRef};
use crate::pipeline::PipelineStatus;

/// Read path for paginated room history.
///
/// Reads try the short-lived cache first and fall back to the durable store.
/// The cache is never authoritative: a snapshot may lag edits and deletes by
/// up to its TTL, and callers are expected to tolerate that.
pub struct HistoryReader {
    cache: Arc<Mutex<PipelineCache>>,
    pool: Arc<DbPool>,
    status: Arc<PipelineStatus>,
}

impl HistoryReader {
    pub fn new(
        cache: Arc<Mutex<PipelineCache>>,
        pool: Arc<DbPool>,
        status: Arc<PipelineStatus>,
    ) -> Self {
        Self {
            cache,
            pool,
            status,
        }
    }

    /// Cache-only accessor for history endpoints: the most recent messages
    /// of a room, newest first. Returns an empty list on a cold or
    /// unavailable cache; the caller decides whether to go to the store.
    pub async fn get_cached_messages(&self, room_id: &Uuid, limit: usize) -> Vec<ChatMessage> {
        match self.cache.lock().await.room_history(room_id, limit).await {
            Ok(messages) => {
                self.status.set_cache_connected(true);
                messages
            }
            Err(e) => {
                self.status.set_cache_connected(false);
                warn!(error = %e, "Cache read failed, returning empty history");
                Vec::new()
            }
        }
    }

    /// Read-through history: cache first, durable store on a miss or outage.
    /// First pages (`before == None`) that fall through re-seed the cache
    /// best-effort so the next reader hits.
    pub async fn recent_messages(
        &self,
        room: &RoomRef,
        before: Option<Uuid>,
        limit: usize,
    ) -> AppResult<Vec<ChatMessage>> {
        // Cursor pagination always goes to the store: the cache only holds
        // the head of the room.
        if before.is_none() {
            let cached = self.get_cached_messages(&room.id(), limit).await;
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let messages = db::list_room_messages(&self.pool, room, before, limit)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        self.status.set_store_connected(true);

        if before.is_none() && !messages.is_empty() {
            self.reseed(&room.id(), &messages).await;
        }
        Ok(messages)
    }

    /// Best-effort cache refill after a store read. Messages arrive newest
    /// first; pushing oldest first rebuilds the list in cache order.
    async fn reseed(&self, room_id: &Uuid, messages: &[ChatMessage]) {
        let mut cache = self.cache.lock().await;
        for message in messages.iter().rev() {
            if let Err(e) = cache.seed_room_history(room_id, message).await {
                debug!(error = %e, "Cache re-seed abandoned");
                return;
            }
        }
    }
}
