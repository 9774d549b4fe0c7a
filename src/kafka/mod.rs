// Durable log integration.
//
// Room events are appended to a single Kafka topic partitioned by room id,
// which gives strict per-room ordering from producer through fanout consumer
// with no cross-room guarantee. Delivery is at-least-once end to end; every
// downstream side effect must tolerate replays.

pub mod consumer;
pub mod metrics;
pub mod producer;
pub mod types;

pub use consumer::RoomEventConsumer;
pub use producer::RoomEventProducer;
pub use types::{RoomEventEnvelope, RoomEventKind};

use rdkafka::config::ClientConfig;

use crate::config::KafkaConfig;

/// Base client configuration shared by producer and consumer.
pub(crate) fn base_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.brokers);
    client_config
}
