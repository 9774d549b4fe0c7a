use anyhow::Result;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_HEALTH_PORT: u16 = 8081;

// Batch writer defaults. The tick period and lock TTL are deliberately
// decoupled: a leader that misses one tick still holds the lock for a full
// extra period before another process can take over.
const DEFAULT_WRITER_TICK_SECS: u64 = 30;
const DEFAULT_LEADER_TTL_SECS: u64 = 60;
const DEFAULT_WRITER_BATCH_MAX: usize = 500;

// Room history cache defaults. The cache is a short-lived accelerator;
// entries expire on their own if the fanout consumer stops refreshing them.
const DEFAULT_ROOM_CACHE_CAP: usize = 100;
const DEFAULT_ROOM_CACHE_TTL_SECS: i64 = 600;

const DEFAULT_PRESENCE_SWEEP_SECS: u64 = 30;

// Per-call ceiling for cache commands on the fanout hot path. Past this the
// consumer degrades to the direct-write fallback rather than stalling the
// partition.
const DEFAULT_CACHE_OP_TIMEOUT_MS: u64 = 2000;

const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 30_000;

// Message size limits (in bytes). Oversized payloads are rejected
// synchronously at the entry point and never enter the pipeline.
pub const MAX_MESSAGE_BODY_BYTES: usize = 8 * 1024;
pub const MAX_ATTACHMENTS_PER_MESSAGE: usize = 10;
pub const MAX_MENTIONS_PER_MESSAGE: usize = 50;

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// When false, user/room ids are logged as salted hashes only.
    pub enable_user_identifiers: bool,
    pub hash_salt: String,
}

/// Durable store connection pool configuration
#[derive(Clone, Debug)]
pub struct DbConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Durable log (Kafka) configuration
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// When false the producer reports every publish as failed, which routes
    /// all traffic through the synchronous direct-write fallback.
    pub enabled: bool,
    /// Comma-separated broker list, e.g. "kafka1:9092,kafka2:9092"
    pub brokers: String,
    /// Topic carrying room events, partitioned by room id
    pub topic: String,
    /// Consumer group shared by all fanout workers
    pub consumer_group: String,
    /// Per-publish timeout; an elapsed timeout counts as a failed publish
    pub publish_timeout_ms: u64,
    pub producer_acks: String,
    pub producer_linger_ms: u32,
    pub producer_retries: u32,
    pub producer_request_timeout_ms: u32,
    pub producer_enable_idempotence: bool,
    pub producer_compression: String,
}

/// Room history cache configuration
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Most-recent messages kept per room
    pub room_cache_cap: usize,
    /// TTL on each room's cache list; readers tolerate staleness up to this
    pub room_cache_ttl_secs: i64,
    pub op_timeout_ms: u64,
}

/// Leader-elected batch writer configuration
#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub tick_secs: u64,
    pub leader_ttl_secs: u64,
    /// Maximum queue entries drained per tick
    pub batch_max: usize,
    /// Deployment name keying the shared batch queue
    pub deployment: String,
}

/// Presence reconciler configuration
#[derive(Clone, Debug)]
pub struct PresenceConfig {
    pub sweep_secs: u64,
}

/// Redis key prefixes and well-known keys
#[derive(Clone, Debug)]
pub struct RedisKeyPrefixes {
    /// Prefix for per-room history lists: "room_cache:{room_id}"
    pub room_cache: String,
    /// Prefix for the per-deployment batch queue: "batch_queue:{deployment}"
    pub batch_queue: String,
    /// Prefix for per-user live-connection sets: "connections:{user_id}"
    pub connections: String,
    /// Set of user ids currently believed online
    pub online_users: String,
    /// Leadership lock key for the batch writer
    pub leader_lock: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub health_port: u16,
    /// Pub/sub channel carrying broadcast frames between instances
    pub broadcast_channel: String,
    pub rust_log: String,
    pub logging: LoggingConfig,
    pub kafka: KafkaConfig,
    pub cache: CacheConfig,
    pub writer: WriterConfig,
    pub presence: PresenceConfig,
    pub redis_key_prefixes: RedisKeyPrefixes,
    pub db: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")?,
            redis_url: std::env::var("REDIS_URL")?,
            health_port: std::env::var("HEALTH_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_HEALTH_PORT),
            broadcast_channel: std::env::var("BROADCAST_CHANNEL")
                .unwrap_or_else(|_| "room_broadcast".to_string()),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            logging: LoggingConfig {
                enable_user_identifiers: std::env::var("LOG_USER_IDENTIFIERS")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
                hash_salt: {
                    let salt = std::env::var("LOG_HASH_SALT")
                        .unwrap_or_else(|_| "cascade-dev-salt".to_string());
                    if salt.is_empty() {
                        anyhow::bail!("LOG_HASH_SALT must not be empty");
                    }
                    salt
                },
            },
            kafka: KafkaConfig {
                enabled: std::env::var("KAFKA_ENABLED")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .unwrap_or(true),
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                topic: std::env::var("KAFKA_TOPIC")
                    .unwrap_or_else(|_| "cascade-room-events".to_string()),
                consumer_group: std::env::var("KAFKA_CONSUMER_GROUP")
                    .unwrap_or_else(|_| "cascade-fanout-workers".to_string()),
                publish_timeout_ms: std::env::var("KAFKA_PUBLISH_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_PUBLISH_TIMEOUT_MS),
                producer_acks: std::env::var("KAFKA_PRODUCER_ACKS")
                    .unwrap_or_else(|_| "all".to_string()),
                producer_linger_ms: std::env::var("KAFKA_PRODUCER_LINGER_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
                // Bounded: exhausted retries surface as a failed publish and
                // the caller falls back to a direct write.
                producer_retries: std::env::var("KAFKA_PRODUCER_RETRIES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
                producer_request_timeout_ms: std::env::var("KAFKA_PRODUCER_REQUEST_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30_000),
                producer_enable_idempotence: std::env::var("KAFKA_PRODUCER_ENABLE_IDEMPOTENCE")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .unwrap_or(true),
                producer_compression: std::env::var("KAFKA_PRODUCER_COMPRESSION")
                    .unwrap_or_else(|_| "snappy".to_string()),
            },
            cache: CacheConfig {
                room_cache_cap: std::env::var("ROOM_CACHE_CAP")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_ROOM_CACHE_CAP),
                room_cache_ttl_secs: std::env::var("ROOM_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_ROOM_CACHE_TTL_SECS),
                op_timeout_ms: std::env::var("CACHE_OP_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_CACHE_OP_TIMEOUT_MS),
            },
            writer: WriterConfig {
                tick_secs: std::env::var("WRITER_TICK_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_WRITER_TICK_SECS),
                leader_ttl_secs: std::env::var("LEADER_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_LEADER_TTL_SECS),
                batch_max: std::env::var("WRITER_BATCH_MAX")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_WRITER_BATCH_MAX),
                deployment: std::env::var("DEPLOYMENT_ID")
                    .unwrap_or_else(|_| "default".to_string()),
            },
            presence: PresenceConfig {
                sweep_secs: std::env::var("PRESENCE_SWEEP_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_PRESENCE_SWEEP_SECS),
            },
            redis_key_prefixes: RedisKeyPrefixes {
                room_cache: std::env::var("REDIS_KEY_PREFIX_ROOM_CACHE")
                    .unwrap_or_else(|_| "room_cache:".to_string()),
                batch_queue: std::env::var("REDIS_KEY_PREFIX_BATCH_QUEUE")
                    .unwrap_or_else(|_| "batch_queue:".to_string()),
                connections: std::env::var("REDIS_KEY_PREFIX_CONNECTIONS")
                    .unwrap_or_else(|_| "connections:".to_string()),
                online_users: std::env::var("REDIS_KEY_ONLINE_USERS")
                    .unwrap_or_else(|_| "online_users".to_string()),
                leader_lock: std::env::var("REDIS_KEY_LEADER_LOCK")
                    .unwrap_or_else(|_| "batch_writer:leader".to_string()),
            },
            db: DbConfig {
                max_connections: std::env::var("DB_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
                acquire_timeout_secs: std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
                idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(600),
            },
        })
    }
}
