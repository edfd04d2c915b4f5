//! Embedded SQLite backend, pooled with `r2d2`/`r2d2_sqlite` rather than a
//! single `rusqlite::Connection`, since multiple tasks (writer, snapshot hub,
//! purge/vacuum) touch the database concurrently.

use chrono::{DateTime, TimeZone, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

use crate::model::{Log, Span, SpanStatus, Trace};

use super::{
    DashboardAggregates, ServiceFailureCount, ServiceMap, ServiceMapEdge, ServiceMapNode,
    StoreError, TrafficBucket,
};

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `dsn` and runs the schema
    /// migration. Called once at startup; a failure here is a fatal startup
    /// error per §6/§7.
    #[instrument(name = "storage::sqlite::open", target = "storage::sqlite", level = "debug")]
    pub fn open(dsn: &str) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(dsn).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = OFF;",
            )
        });
        let pool = Pool::builder().build(manager).map_err(StoreError::Pool)?;

        let conn = pool.get().map_err(StoreError::Pool)?;
        run_migrations(&conn).map_err(|source| StoreError::Open { dsn: dsn.to_string(), source })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS traces (
            trace_id    TEXT PRIMARY KEY,
            service_name TEXT NOT NULL,
            operation   TEXT NOT NULL,
            status      TEXT NOT NULL,
            duration_us INTEGER NOT NULL,
            timestamp   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_traces_timestamp ON traces(timestamp);
        CREATE INDEX IF NOT EXISTS idx_traces_service ON traces(service_name);

        CREATE TABLE IF NOT EXISTS spans (
            span_id         TEXT PRIMARY KEY,
            parent_span_id  TEXT,
            trace_id        TEXT NOT NULL,
            service_name    TEXT NOT NULL,
            operation_name  TEXT NOT NULL,
            start_time      TEXT NOT NULL,
            end_time        TEXT NOT NULL,
            duration_us     INTEGER NOT NULL,
            attributes_json TEXT NOT NULL,
            status          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_spans_trace_id ON spans(trace_id);
        CREATE INDEX IF NOT EXISTS idx_spans_start_time ON spans(start_time);

        CREATE TABLE IF NOT EXISTS logs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            trace_id        TEXT,
            span_id         TEXT,
            severity        TEXT NOT NULL,
            body            TEXT NOT NULL,
            service_name    TEXT NOT NULL,
            attributes_json TEXT NOT NULL,
            ai_insight      TEXT,
            timestamp       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
        CREATE INDEX IF NOT EXISTS idx_logs_service ON logs(service_name);
        ",
    )?;
    Ok(())
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap_or_default())
}

impl super::Store for SqliteStore {
    #[instrument(skip(self, traces), fields(count = traces.len()), level = "debug")]
    async fn insert_traces_batch(&self, traces: &[Trace]) -> Result<(), StoreError> {
        let pool = self.clone();
        let traces = traces.to_vec();
        run_blocking(move || {
            let mut conn = pool.conn()?;
            let tx = conn.transaction()?;
            for t in &traces {
                tx.execute(
                    "INSERT OR IGNORE INTO traces (trace_id, service_name, operation, status, duration_us, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        t.trace_id,
                        t.service_name,
                        t.operation,
                        t.status.as_str(),
                        t.duration_us,
                        t.timestamp.to_rfc3339(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, spans), fields(count = spans.len()), level = "debug")]
    async fn insert_spans_batch(&self, spans: &[Span]) -> Result<(), StoreError> {
        let pool = self.clone();
        let spans = spans.to_vec();
        run_blocking(move || {
            let mut conn = pool.conn()?;
            let tx = conn.transaction()?;
            for s in &spans {
                tx.execute(
                    "INSERT OR IGNORE INTO spans
                     (span_id, parent_span_id, trace_id, service_name, operation_name, start_time, end_time, duration_us, attributes_json, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        s.span_id,
                        s.parent_span_id,
                        s.trace_id,
                        s.service_name,
                        s.operation_name,
                        s.start_time.to_rfc3339(),
                        s.end_time.to_rfc3339(),
                        s.duration_us,
                        s.attributes_json,
                        s.status.as_str(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, logs), fields(count = logs.len()), level = "debug")]
    async fn insert_logs_batch(&self, logs: &[Log]) -> Result<(), StoreError> {
        let pool = self.clone();
        let logs = logs.to_vec();
        run_blocking(move || {
            let mut conn = pool.conn()?;
            let tx = conn.transaction()?;
            for l in &logs {
                tx.execute(
                    "INSERT OR IGNORE INTO logs
                     (id, trace_id, span_id, severity, body, service_name, attributes_json, ai_insight, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        l.id,
                        l.trace_id,
                        l.span_id,
                        l.severity.as_str(),
                        l.body,
                        l.service_name,
                        l.attributes_json,
                        l.ai_insight,
                        l.timestamp.to_rfc3339(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn dashboard_aggregates(
        &self,
        window: chrono::Duration,
        service: Option<&str>,
    ) -> Result<DashboardAggregates, StoreError> {
        let pool = self.clone();
        let since = (Utc::now() - window).to_rfc3339();
        let service = service.map(str::to_string);
        run_blocking(move || {
            let conn = pool.conn()?;

            let (total_traces, error_traces, avg_us, active_services): (i64, i64, f64, i64) =
                conn.query_row(
                    "SELECT COUNT(*),
                            SUM(CASE WHEN status = 'ERROR' THEN 1 ELSE 0 END),
                            COALESCE(AVG(duration_us), 0.0),
                            COUNT(DISTINCT service_name)
                     FROM traces WHERE timestamp >= ?1 AND (?2 IS NULL OR service_name = ?2)",
                    params![since, service],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                            row.get(2)?,
                            row.get(3)?,
                        ))
                    },
                )?;

            // p99 via a simple ordered offset rather than a window function,
            // so the same query shape works with or without a service filter.
            let p99_us = if total_traces > 0 {
                let offset = ((total_traces as f64) * 0.99).floor().max(0.0) as i64;
                let offset = offset.min(total_traces - 1);
                conn.query_row(
                    "SELECT duration_us FROM traces
                     WHERE timestamp >= ?1 AND (?2 IS NULL OR service_name = ?2)
                     ORDER BY duration_us LIMIT 1 OFFSET ?3",
                    params![since, service, offset],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0.0)
            } else {
                0.0
            };

            let total_logs: i64 = conn.query_row(
                "SELECT COUNT(*) FROM logs WHERE timestamp >= ?1 AND (?2 IS NULL OR service_name = ?2)",
                params![since, service],
                |row| row.get(0),
            )?;

            let mut top_stmt = conn.prepare(
                "SELECT service_name, COUNT(*) as errs FROM traces
                 WHERE timestamp >= ?1 AND status = 'ERROR' AND (?2 IS NULL OR service_name = ?2)
                 GROUP BY service_name ORDER BY errs DESC LIMIT 5",
            )?;
            let top_failing_services = top_stmt
                .query_map(params![since, service], |row| {
                    Ok(ServiceFailureCount { service_name: row.get(0)?, error_count: row.get(1)? })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let error_rate = if total_traces > 0 { error_traces as f64 / total_traces as f64 } else { 0.0 };

            Ok(DashboardAggregates {
                total_traces,
                total_logs,
                error_rate,
                avg_latency_us: avg_us,
                p99_latency_us: p99_us,
                active_services,
                top_failing_services,
            })
        })
        .await
    }

    async fn traffic_series(
        &self,
        window: chrono::Duration,
        service: Option<&str>,
    ) -> Result<Vec<TrafficBucket>, StoreError> {
        let pool = self.clone();
        let since = (Utc::now() - window).to_rfc3339();
        let service = service.map(str::to_string);
        run_blocking(move || {
            let conn = pool.conn()?;
            let mut stmt = conn.prepare(
                "SELECT substr(timestamp, 1, 16) as minute,
                        COUNT(*),
                        SUM(CASE WHEN status = 'ERROR' THEN 1 ELSE 0 END)
                 FROM traces
                 WHERE timestamp >= ?1 AND (?2 IS NULL OR service_name = ?2)
                 GROUP BY minute ORDER BY minute ASC",
            )?;
            let rows = stmt
                .query_map(params![since, service], |row| {
                    let minute_str: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    let error_count: Option<i64> = row.get(2)?;
                    Ok((minute_str, count, error_count.unwrap_or(0)))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .map(|(minute_str, count, error_count)| TrafficBucket {
                    minute: parse_ts(&format!("{minute_str}:00Z")),
                    count,
                    error_count,
                })
                .collect())
        })
        .await
    }

    async fn recent_traces(
        &self,
        window: chrono::Duration,
        service: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Trace>, StoreError> {
        let pool = self.clone();
        let since = (Utc::now() - window).to_rfc3339();
        let service = service.map(str::to_string);
        run_blocking(move || {
            let conn = pool.conn()?;
            let mut stmt = conn.prepare(
                "SELECT trace_id, service_name, operation, status, duration_us, timestamp
                 FROM traces
                 WHERE timestamp >= ?1 AND (?2 IS NULL OR service_name = ?2)
                 ORDER BY timestamp DESC LIMIT ?3",
            )?;
            let traces = stmt
                .query_map(params![since, service, limit as i64], |row| {
                    let status_str: String = row.get(3)?;
                    let ts: String = row.get(5)?;
                    Ok(Trace {
                        trace_id: row.get(0)?,
                        service_name: row.get(1)?,
                        operation: row.get(2)?,
                        status: parse_span_status(&status_str),
                        duration_us: row.get(4)?,
                        timestamp: parse_ts(&ts),
                        spans: Vec::new(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(traces)
        })
        .await
    }

    async fn service_map(&self, window: chrono::Duration) -> Result<ServiceMap, StoreError> {
        let pool = self.clone();
        let since = (Utc::now() - window).to_rfc3339();
        run_blocking(move || {
            let conn = pool.conn()?;

            let mut node_stmt = conn.prepare(
                "SELECT DISTINCT service_name FROM spans WHERE start_time >= ?1",
            )?;
            let nodes = node_stmt
                .query_map(params![since], |row| {
                    Ok(ServiceMapNode { service_name: row.get(0)? })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            // Derive true parent -> child edges from parent_span_id (§9
            // decided behavior), joining each span to its parent's service.
            let mut edge_stmt = conn.prepare(
                "SELECT parent.service_name, child.service_name, COUNT(*)
                 FROM spans child
                 JOIN spans parent ON parent.span_id = child.parent_span_id
                 WHERE child.start_time >= ?1 AND parent.service_name != child.service_name
                 GROUP BY parent.service_name, child.service_name",
            )?;
            let edges = edge_stmt
                .query_map(params![since], |row| {
                    Ok(ServiceMapEdge { from: row.get(0)?, to: row.get(1)?, call_count: row.get(2)? })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(ServiceMap { nodes, edges })
        })
        .await
    }

    async fn purge_older_than(&self, days: i64) -> Result<(), StoreError> {
        let pool = self.clone();
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        run_blocking(move || {
            let conn = pool.conn()?;
            conn.execute("DELETE FROM logs WHERE timestamp < ?1", params![cutoff])?;
            conn.execute("DELETE FROM spans WHERE start_time < ?1", params![cutoff])?;
            conn.execute("DELETE FROM traces WHERE timestamp < ?1", params![cutoff])?;
            Ok(())
        })
        .await
    }

    async fn vacuum(&self) -> Result<(), StoreError> {
        let pool = self.clone();
        run_blocking(move || {
            let conn = pool.conn()?;
            conn.execute_batch("VACUUM;")?;
            Ok(())
        })
        .await
    }
}

fn parse_span_status(raw: &str) -> SpanStatus {
    match raw {
        "OK" => SpanStatus::Ok,
        "ERROR" => SpanStatus::Error,
        _ => SpanStatus::Unset,
    }
}

/// Runs a blocking SQLite closure on the blocking thread pool, the way
/// `rusqlite`-backed stores are meant to be called from an async runtime.
async fn run_blocking<F, T>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!(error = %join_err, "sqlite blocking task panicked");
            Err(StoreError::Internal(join_err.to_string()))
        }
    }
}
