//! Prometheus collectors for the ingest-to-broadcast core (§6). Every
//! collector is registered once via `lazy_static` and gathered by
//! `server::metrics_handler` on `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, HistogramVec, register_counter_vec, register_gauge, register_histogram_vec,
};

lazy_static! {
    /// Records admitted per call, labeled by record kind (`trace`/`span`/`log`).
    pub static ref INGESTION_RATE: CounterVec = register_counter_vec!(
        "argus_ingestion_rate",
        "Count of records admitted by the filter engine",
        &["kind"]
    )
    .unwrap();

    /// WebSocket clients currently connected, summed across both hubs.
    pub static ref ACTIVE_CONNECTIONS: Gauge = register_gauge!(
        "argus_active_connections",
        "Number of connected WebSocket clients across the broadcast and snapshot hubs"
    )
    .unwrap();

    /// Wall-clock of each batched insert call, labeled by record kind.
    pub static ref DB_LATENCY: HistogramVec = register_histogram_vec!(
        "argus_db_latency",
        "Batched insert latency in seconds",
        &["kind"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap();

    /// Count of `*.json` files currently spooled in the DLQ directory.
    pub static ref DLQ_SIZE: Gauge = register_gauge!(
        "argus_dlq_size",
        "Number of batches currently spooled in the dead-letter queue"
    )
    .unwrap();

    /// Records dropped because the writer's inbound channel was full.
    pub static ref WRITER_OVERFLOW: CounterVec = register_counter_vec!(
        "argus_writer_overflow",
        "Records dropped because the batch writer's channel was full",
        &["kind"]
    )
    .unwrap();

    /// Batches successfully replayed out of the DLQ.
    pub static ref DLQ_REPLAYED: prometheus::Counter = prometheus::register_counter!(
        "argus_dlq_replayed",
        "Batches successfully replayed out of the dead-letter queue"
    )
    .unwrap();

    /// DLQ writes that failed outright (data loss events).
    pub static ref DLQ_WRITE_FAILURES: prometheus::Counter = prometheus::register_counter!(
        "argus_dlq_write_failures",
        "Dead-letter queue writes that failed outright, losing the batch"
    )
    .unwrap();

    /// Filter denials, labeled by reason (`severity`, `deny_list`, `allow_miss`).
    pub static ref FILTER_REJECTIONS: CounterVec = register_counter_vec!(
        "argus_filter_rejections",
        "Records denied by the ingestion filter, labeled by reason",
        &["reason"]
    )
    .unwrap();
}

/// Observes an already-elapsed duration into a labeled histogram. Takes the
/// duration directly so callers can measure the whole flush (including
/// serialization) rather than just the insert call.
pub fn observe_db_latency(kind: &str, elapsed: std::time::Duration) {
    DB_LATENCY.with_label_values(&[kind]).observe(elapsed.as_secs_f64());
}
