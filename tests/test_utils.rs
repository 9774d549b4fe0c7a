// Shared helpers for the Redis-backed integration suites.
//
// Tests get a config built literally (no .env required) with key prefixes
// namespaced per run, so parallel CI jobs sharing one Redis cannot collide.

use std::env;

use cascade_server::config::{
    CacheConfig, Config, DbConfig, KafkaConfig, LoggingConfig, PresenceConfig, RedisKeyPrefixes,
    WriterConfig,
};

#[allow(dead_code)]
pub fn test_config(tag: &str) -> Config {
    Config {
        database_url: "".to_string(), // not needed for cache-only tests
        redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        health_port: 8081,
        broadcast_channel: format!("test-broadcast-{}", tag),
        rust_log: "info".to_string(),
        logging: LoggingConfig {
            enable_user_identifiers: false,
            hash_salt: "test-salt".to_string(),
        },
        kafka: KafkaConfig {
            enabled: false,
            brokers: "".to_string(),
            topic: "".to_string(),
            consumer_group: "".to_string(),
            publish_timeout_ms: 1000,
            producer_acks: "1".to_string(),
            producer_linger_ms: 0,
            producer_retries: 0,
            producer_request_timeout_ms: 1000,
            producer_enable_idempotence: false,
            producer_compression: "none".to_string(),
        },
        // Small cap so trimming is observable without hundreds of messages.
        cache: CacheConfig {
            room_cache_cap: 5,
            room_cache_ttl_secs: 60,
            op_timeout_ms: 2000,
        },
        writer: WriterConfig {
            tick_secs: 30,
            leader_ttl_secs: 60,
            batch_max: 500,
            deployment: format!("test-{}", tag),
        },
        presence: PresenceConfig { sweep_secs: 30 },
        redis_key_prefixes: RedisKeyPrefixes {
            room_cache: format!("test_room_cache_{}:", tag),
            batch_queue: format!("test_batch_queue_{}:", tag),
            connections: format!("test_connections_{}:", tag),
            online_users: format!("test_online_users_{}", tag),
            leader_lock: format!("test_leader_lock_{}", tag),
        },
        db: DbConfig {
            max_connections: 5,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 60,
        },
    }
}
