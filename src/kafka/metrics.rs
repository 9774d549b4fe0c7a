use once_cell::sync::Lazy;
use prometheus::{register_counter, register_histogram, Counter, Histogram};

/// Successful appends to the durable log
pub static LOG_PUBLISH_SUCCESS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "log_publish_success_total",
        "Total number of room events successfully appended to the durable log"
    )
    .expect("Failed to register log_publish_success_total metric")
});

/// Failed appends (the caller falls back to a direct write)
pub static LOG_PUBLISH_FAILURE: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "log_publish_failure_total",
        "Total number of failed durable log appends"
    )
    .expect("Failed to register log_publish_failure_total metric")
});

/// Append latency, from send to broker acknowledgment
pub static LOG_PUBLISH_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "log_publish_latency_seconds",
        "Durable log append latency in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register log_publish_latency_seconds metric")
});

/// Room events processed by the fanout consumer
pub static FANOUT_CONSUME_SUCCESS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fanout_consume_success_total",
        "Total number of room events processed by the fanout consumer"
    )
    .expect("Failed to register fanout_consume_success_total metric")
});

/// Room events skipped by the fanout consumer (malformed or failed)
pub static FANOUT_CONSUME_SKIPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fanout_consume_skipped_total",
        "Total number of room events skipped by the fanout consumer"
    )
    .expect("Failed to register fanout_consume_skipped_total metric")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_once() {
        LOG_PUBLISH_SUCCESS.inc();
        LOG_PUBLISH_FAILURE.inc();
        LOG_PUBLISH_LATENCY.observe(0.05);
        FANOUT_CONSUME_SUCCESS.inc();
        FANOUT_CONSUME_SKIPPED.inc();
    }
}
