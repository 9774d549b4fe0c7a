use std::time::Duration;

use anyhow::Result;
use redis::{cmd, AsyncCommands, Client};
use uuid::Uuid;

use crate::config::Config;
use crate::message::ChatMessage;

/// Client for the distributed Cache/Lock Service (Redis).
///
/// Holds three kinds of state, all best-effort except the batch queue:
/// - per-room history lists (bounded, TTL'd accelerator, never authoritative)
/// - the per-deployment batch queue feeding the leader-elected writer
/// - presence marks and per-user live-connection sets
///
/// Hot-path operations are wrapped in an explicit per-call timeout so a slow
/// cache degrades to the fallback path instead of stalling the caller.
pub struct PipelineCache {
    client: redis::aio::ConnectionManager,
    room_cache_cap: usize,
    room_cache_ttl_secs: i64,
    op_timeout: Duration,
    room_cache_prefix: String,
    batch_queue_prefix: String,
    connections_prefix: String,
    online_users_key: String,
}

impl PipelineCache {
    pub async fn new(config: &Config) -> Result<Self> {
        if config.redis_url.starts_with("rediss://") {
            tracing::info!("Cache TLS enabled (rediss://)");
        }

        let client = Client::open(config.redis_url.clone())
            .map_err(|e| anyhow::anyhow!("Failed to parse cache URL: {}", e))?;

        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to cache: {}", e))?;

        Ok(Self {
            client: conn,
            room_cache_cap: config.cache.room_cache_cap,
            room_cache_ttl_secs: config.cache.room_cache_ttl_secs,
            op_timeout: Duration::from_millis(config.cache.op_timeout_ms),
            room_cache_prefix: config.redis_key_prefixes.room_cache.clone(),
            batch_queue_prefix: config.redis_key_prefixes.batch_queue.clone(),
            connections_prefix: config.redis_key_prefixes.connections.clone(),
            online_users_key: config.redis_key_prefixes.online_users.clone(),
        })
    }

    // ========================================================================
    // Room history cache
    // ========================================================================

    /// Push a message to the front of its room's history list, trim to the
    /// cap and reset the TTL. Idempotent in effect under replays: a duplicate
    /// push costs one stale slot that the cap trims away.
    pub async fn seed_room_history(&mut self, room_id: &Uuid, message: &ChatMessage) -> Result<()> {
        let key = format!("{}{}", self.room_cache_prefix, room_id);
        let bytes = rmp_serde::encode::to_vec_named(message)?;
        let cap_end = self.room_cache_cap as isize - 1;
        let ttl = self.room_cache_ttl_secs;
        let op_timeout = self.op_timeout;

        let op = async {
            let _: () = self.client.lpush(&key, bytes).await?;
            let _: () = self.client.ltrim(&key, 0, cap_end).await?;
            let _: () = self.client.expire(&key, ttl).await?;
            Ok::<_, redis::RedisError>(())
        };
        tokio::time::timeout(op_timeout, op)
            .await
            .map_err(|_| anyhow::anyhow!("cache seed timed out for room {}", room_id))??;

        tracing::debug!(room_id = %room_id, message_id = %message.id, "Seeded room history cache");
        Ok(())
    }

    /// Most-recent-first history snapshot for a room. Corrupt entries are
    /// skipped with a warning rather than failing the read.
    pub async fn room_history(&mut self, room_id: &Uuid, limit: usize) -> Result<Vec<ChatMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = format!("{}{}", self.room_cache_prefix, room_id);
        let end = limit as isize - 1;
        let op_timeout = self.op_timeout;

        let op = async {
            let raw: Vec<Vec<u8>> = self.client.lrange(&key, 0, end).await?;
            Ok::<_, redis::RedisError>(raw)
        };
        let raw = tokio::time::timeout(op_timeout, op)
            .await
            .map_err(|_| anyhow::anyhow!("cache read timed out for room {}", room_id))??;

        let mut messages = Vec::with_capacity(raw.len());
        for bytes in raw {
            match rmp_serde::from_slice::<ChatMessage>(&bytes) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    tracing::warn!(room_id = %room_id, error = %e, "Dropping corrupt cache entry")
                }
            }
        }
        Ok(messages)
    }

    // ========================================================================
    // Batch queue (FIFO, keyed per deployment)
    // ========================================================================

    /// Append a message to the batch-write queue. Entries stay until the
    /// leader confirms a bulk write covering them.
    pub async fn queue_append(&mut self, deployment: &str, message: &ChatMessage) -> Result<()> {
        let key = format!("{}{}", self.batch_queue_prefix, deployment);
        let bytes = rmp_serde::encode::to_vec_named(message)?;
        let op_timeout = self.op_timeout;

        let op = async {
            let _: () = self.client.rpush(&key, bytes).await?;
            Ok::<_, redis::RedisError>(())
        };
        tokio::time::timeout(op_timeout, op)
            .await
            .map_err(|_| anyhow::anyhow!("batch queue append timed out"))??;

        tracing::debug!(message_id = %message.id, "Appended message to batch queue");
        Ok(())
    }

    /// Peek up to `max` entries from the front of the queue without removing
    /// them. The writer removes them with [`queue_trim`] only after the bulk
    /// write is acknowledged.
    pub async fn queue_peek(&mut self, deployment: &str, max: usize) -> Result<Vec<Vec<u8>>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let key = format!("{}{}", self.batch_queue_prefix, deployment);
        let entries: Vec<Vec<u8>> = self.client.lrange(&key, 0, max as isize - 1).await?;
        Ok(entries)
    }

    /// Remove exactly `count` entries from the front of the queue.
    pub async fn queue_trim(&mut self, deployment: &str, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let key = format!("{}{}", self.batch_queue_prefix, deployment);
        let _: () = self.client.ltrim(&key, count as isize, -1).await?;
        Ok(())
    }

    pub async fn queue_len(&mut self, deployment: &str) -> Result<usize> {
        let key = format!("{}{}", self.batch_queue_prefix, deployment);
        let len: i64 = self.client.llen(&key).await?;
        Ok(len as usize)
    }

    // ========================================================================
    // Presence marks and live-connection tracking
    // ========================================================================

    /// Mark a user as believed-online. Set on connect; a mark that outlives
    /// its connections is stale and corrected by the reconciler.
    pub async fn mark_online(&mut self, user_id: &Uuid) -> Result<()> {
        let _: () = self
            .client
            .sadd(&self.online_users_key, user_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn clear_online_mark(&mut self, user_id: &Uuid) -> Result<()> {
        let _: () = self
            .client
            .srem(&self.online_users_key, user_id.to_string())
            .await?;
        Ok(())
    }

    /// All user ids currently marked online. Unparseable members are skipped.
    pub async fn marked_online(&mut self) -> Result<Vec<Uuid>> {
        let members: Vec<String> = self.client.smembers(&self.online_users_key).await?;
        Ok(members
            .iter()
            .filter_map(|m| Uuid::parse_str(m).ok())
            .collect())
    }

    pub async fn track_connection(&mut self, user_id: &Uuid, connection_id: &Uuid) -> Result<()> {
        let key = format!("{}{}", self.connections_prefix, user_id);
        let _: () = self.client.sadd(&key, connection_id.to_string()).await?;
        // Safety TTL: an instance that dies without cleanup cannot pin a user
        // online forever.
        let _: () = self.client.expire(&key, 3600).await?;
        Ok(())
    }

    pub async fn untrack_connection(&mut self, user_id: &Uuid, connection_id: &Uuid) -> Result<()> {
        let key = format!("{}{}", self.connections_prefix, user_id);
        let _: () = self.client.srem(&key, connection_id.to_string()).await?;
        Ok(())
    }

    /// Cheap predicate behind the presence reconciler: does the user have at
    /// least one live connection anywhere in the fleet?
    pub async fn has_live_connection(&mut self, user_id: &Uuid) -> Result<bool> {
        let key = format!("{}{}", self.connections_prefix, user_id);
        let count: i64 = self.client.scard(&key).await?;
        Ok(count > 0)
    }

    // ========================================================================
    // Pub/sub and connectivity
    // ========================================================================

    /// Publish a payload on a pub/sub channel (broadcast frames, presence
    /// events).
    pub async fn publish(&mut self, channel: &str, payload: &str) -> Result<()> {
        let op_timeout = self.op_timeout;
        let op = async {
            let _: () = self.client.publish(channel, payload).await?;
            Ok::<_, redis::RedisError>(())
        };
        tokio::time::timeout(op_timeout, op)
            .await
            .map_err(|_| anyhow::anyhow!("publish on {} timed out", channel))??;
        Ok(())
    }

    pub async fn ping(&mut self) -> Result<()> {
        let op_timeout = self.op_timeout;
        let op = async {
            let _: () = cmd("PING").query_async(&mut self.client).await?;
            Ok::<_, redis::RedisError>(())
        };
        tokio::time::timeout(op_timeout, op)
            .await
            .map_err(|_| anyhow::anyhow!("cache ping timed out"))??;
        Ok(())
    }
}
