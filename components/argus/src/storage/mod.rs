//! The abstract store contract of §6 and its single embedded implementation.
//!
//! The writer and the DLQ replay worker are both parameterized over an
//! `insert`/`replay` callback (§9 "avoiding dispatch over a framework") so
//! neither has a compile-time dependency on `SqliteStore`; this module is the
//! only place that type is named outside of wiring in `runtime::runtime`.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::model::{Log, Span, Trace};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at {dsn:?}: {source}")]
    Open {
        dsn: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("blocking task panicked: {0}")]
    Internal(String),
}

/// A single bucket in the snapshot hub's per-minute traffic series.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TrafficBucket {
    pub minute: chrono::DateTime<chrono::Utc>,
    pub count: i64,
    pub error_count: i64,
}

/// Aggregate counters shown on the dashboard (§4.6).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DashboardAggregates {
    pub total_traces: i64,
    pub total_logs: i64,
    pub error_rate: f64,
    pub avg_latency_us: f64,
    pub p99_latency_us: f64,
    pub active_services: i64,
    pub top_failing_services: Vec<ServiceFailureCount>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ServiceFailureCount {
    pub service_name: String,
    pub error_count: i64,
}

/// A node in the service-map graph: one entry per distinct service seen in
/// the rolling window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct ServiceMapNode {
    pub service_name: String,
}

/// A directed edge `from -> to`, derived from `parent_span_id` (§9 decided
/// behavior, not the source's all-pairs approximation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct ServiceMapEdge {
    pub from: String,
    pub to: String,
    pub call_count: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ServiceMap {
    pub nodes: Vec<ServiceMapNode>,
    pub edges: Vec<ServiceMapEdge>,
}

/// The abstract storage back-end the writer and snapshot hub depend on
/// (§6). The core ships a single implementation (`SqliteStore`); additional
/// drivers are a deployment concern, not a core one (§1). Methods are native
/// `async fn`s rather than a boxed `dyn Store` — every caller holds a
/// concrete `Arc<SqliteStore>` or a generic `S: Store`, so there is no need
/// to pay for dynamic dispatch (§9 prefers callbacks over a storage trait
/// object for the same reason in the writer and DLQ).
pub trait Store: Send + Sync + 'static {
    async fn insert_traces_batch(&self, traces: &[Trace]) -> Result<(), StoreError>;
    async fn insert_spans_batch(&self, spans: &[Span]) -> Result<(), StoreError>;
    async fn insert_logs_batch(&self, logs: &[Log]) -> Result<(), StoreError>;

    /// Aggregates over the last `window` for the dashboard view, optionally
    /// restricted to one service (`None` means "all services", §4.6).
    async fn dashboard_aggregates(
        &self,
        window: chrono::Duration,
        service: Option<&str>,
    ) -> Result<DashboardAggregates, StoreError>;

    /// Per-minute traffic counts over `window`.
    async fn traffic_series(
        &self,
        window: chrono::Duration,
        service: Option<&str>,
    ) -> Result<Vec<TrafficBucket>, StoreError>;

    /// Most recent traces, newest first, capped at `limit`.
    async fn recent_traces(
        &self,
        window: chrono::Duration,
        service: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Trace>, StoreError>;

    /// Service-map nodes/edges derived from spans in the last `window`.
    async fn service_map(&self, window: chrono::Duration) -> Result<ServiceMap, StoreError>;

    async fn purge_older_than(&self, days: i64) -> Result<(), StoreError>;
    async fn vacuum(&self) -> Result<(), StoreError>;
}
