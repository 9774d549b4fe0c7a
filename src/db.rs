use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, QueryBuilder};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::message::{ChatMessage, RoomRef};

pub type DbPool = Pool<Postgres>;

const MESSAGE_COLUMNS: &str = "id, channel_id, dm_room_id, sender_id, kind, body, \
     attachments, mentions, parent_id, created_at, edited_at, deleted, pinned";

pub async fn create_pool(config: &Config) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db.max_connections)
        .acquire_timeout(Duration::from_secs(config.db.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.db.idle_timeout_secs))
        .connect(&config.database_url)
        .await?;
    Ok(pool)
}

/// Idempotent bulk insert: rows whose id already exists are skipped.
/// Returns the number of rows actually written.
///
/// The whole batch goes through one statement, so a failure writes nothing
/// and the caller can retry the identical batch later.
pub async fn insert_messages(pool: &DbPool, messages: &[ChatMessage]) -> Result<u64> {
    if messages.is_empty() {
        return Ok(0);
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO messages ({}) ",
        MESSAGE_COLUMNS
    ));
    builder.push_values(messages, |mut row, m| {
        row.push_bind(m.id)
            .push_bind(m.channel_id)
            .push_bind(m.dm_room_id)
            .push_bind(m.sender_id)
            .push_bind(m.kind)
            .push_bind(m.body.clone())
            .push_bind(m.attachments.clone())
            .push_bind(m.mentions.clone())
            .push_bind(m.parent_id)
            .push_bind(m.created_at)
            .push_bind(m.edited_at)
            .push_bind(m.deleted)
            .push_bind(m.pinned);
    });
    builder.push(" ON CONFLICT (id) DO NOTHING");

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Single-row variant of [`insert_messages`], used by the direct-write
/// fallback paths. Returns true when the row was written, false when a row
/// with the same id already existed.
pub async fn insert_message(pool: &DbPool, message: &ChatMessage) -> Result<bool> {
    Ok(insert_messages(pool, std::slice::from_ref(message)).await? > 0)
}

pub async fn message_exists(pool: &DbPool, id: &Uuid) -> Result<bool> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM messages WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

pub async fn find_message_by_id(pool: &DbPool, id: &Uuid) -> Result<Option<ChatMessage>> {
    let message = sqlx::query_as::<_, ChatMessage>(&format!(
        "SELECT {} FROM messages WHERE id = $1",
        MESSAGE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(message)
}

/// Paginated room history from the durable store, newest first.
///
/// Message ids are time-ordered, so `ORDER BY id DESC` is creation order and
/// `before` works as a cursor without a separate timestamp index.
pub async fn list_room_messages(
    pool: &DbPool,
    room: &RoomRef,
    before: Option<Uuid>,
    limit: usize,
) -> Result<Vec<ChatMessage>> {
    let room_column = match room {
        RoomRef::Channel(_) => "channel_id",
        RoomRef::Direct(_) => "dm_room_id",
    };
    let sql = format!(
        "SELECT {} FROM messages \
         WHERE {} = $1 AND deleted = FALSE AND ($2::uuid IS NULL OR id < $2) \
         ORDER BY id DESC LIMIT $3",
        MESSAGE_COLUMNS, room_column
    );

    let messages = sqlx::query_as::<_, ChatMessage>(&sql)
        .bind(room.id())
        .bind(before)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;
    Ok(messages)
}

/// Record a user as offline with their last-seen timestamp. Used on graceful
/// disconnect and by the presence reconciler when it finds a stale mark.
pub async fn mark_user_offline(
    pool: &DbPool,
    user_id: &Uuid,
    last_seen: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE users SET presence_status = 'offline', last_seen_at = $2 WHERE id = $1",
    )
    .bind(user_id)
    .bind(last_seen)
    .execute(pool)
    .await?;
    Ok(())
}
