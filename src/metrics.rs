use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter, Encoder, IntCounter, TextEncoder};

pub static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "cascade_connections_total",
        "Total number of client connections registered"
    ))
    .unwrap()
});

pub static MESSAGES_SUBMITTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "cascade_messages_submitted_total",
        "Total number of messages accepted at the entry point"
    ))
    .unwrap()
});

pub static MESSAGES_DIRECT_WRITE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "cascade_messages_direct_write_total",
        "Total number of messages persisted via the direct-write fallback"
    ))
    .unwrap()
});

pub static BROADCAST_FRAMES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "cascade_broadcast_frames_total",
        "Total number of frames published to the broadcast channel"
    ))
    .unwrap()
});

pub static BATCH_FLUSH_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "cascade_batch_flush_total",
        "Total number of successful batch writer flushes"
    ))
    .unwrap()
});

pub static BATCH_FLUSH_FAILURE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "cascade_batch_flush_failure_total",
        "Total number of failed batch writer flushes"
    ))
    .unwrap()
});

pub static PRESENCE_CORRECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "cascade_presence_corrections_total",
        "Total number of stale presence marks corrected by the reconciler"
    ))
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
