//! Batch writer (§4.3): accumulates admitted records into three per-kind
//! buffers behind a single task and flushes each on a size/time trigger.
//! Parameterized by an `insert(kind, batch)` callback rather than a concrete
//! `Store` (§9 "avoiding dispatch over a framework"), keeping the handoff
//! channel and the background flush worker cleanly split.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::instrument;

use crate::dlq::Dlq;
use crate::metrics;
use crate::model::{Batch, Log, RecordKind, Span, Trace};

/// A single normalized record on its way to a per-kind buffer.
#[derive(Debug, Clone)]
pub enum Record {
    Trace(Trace),
    Span(Span),
    Log(Log),
}

impl Record {
    fn kind(&self) -> RecordKind {
        match self {
            Record::Trace(_) => RecordKind::Trace,
            Record::Span(_) => RecordKind::Span,
            Record::Log(_) => RecordKind::Log,
        }
    }
}

/// Tuning knobs read from `WriterConfig` (§4.3: `BATCH_MAX` recommended 500,
/// `BATCH_TIMEOUT` recommended 200ms).
#[derive(Debug, Clone, Copy)]
pub struct WriterTuning {
    pub batch_max: usize,
    pub batch_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for WriterTuning {
    fn default() -> Self {
        Self {
            batch_max: 500,
            batch_timeout: Duration::from_millis(200),
            channel_capacity: 10_000,
        }
    }
}

/// Handle held by receivers. `submit` is a non-blocking send: the receiver
/// path must never suspend after decoding (§5), so overflow silently drops
/// the record and increments `argus_writer_overflow`.
#[derive(Debug, Clone)]
pub struct Writer {
    sender: mpsc::Sender<Record>,
}

impl Writer {
    /// Attempts to enqueue `record`. Never awaits: uses `try_send`, dropping
    /// on a full channel rather than applying back-pressure to the caller.
    #[instrument(skip(self, record), fields(kind = %record.kind()), level = "trace")]
    pub fn submit(&self, record: Record) {
        let kind = record.kind();
        if self.sender.try_send(record).is_err() {
            tracing::warn!(kind = %kind, "writer channel full, dropping record");
            metrics::WRITER_OVERFLOW.with_label_values(&[kind.as_str()]).inc();
        }
    }
}

struct PendingBuffer<T> {
    records: Vec<T>,
    first_enqueued_at: Option<Instant>,
}

impl<T> Default for PendingBuffer<T> {
    fn default() -> Self {
        Self { records: Vec::new(), first_enqueued_at: None }
    }
}

impl<T> PendingBuffer<T> {
    fn push(&mut self, record: T, now: Instant) {
        if self.records.is_empty() {
            self.first_enqueued_at = Some(now);
        }
        self.records.push(record);
    }

    fn should_flush(&self, batch_max: usize, batch_timeout: Duration, now: Instant) -> bool {
        if self.records.len() >= batch_max {
            return true;
        }
        match self.first_enqueued_at {
            Some(first) => now.duration_since(first) >= batch_timeout,
            None => false,
        }
    }

    fn take(&mut self) -> Vec<T> {
        self.first_enqueued_at = None;
        std::mem::take(&mut self.records)
    }
}

/// Spawns the writer's background task. `insert` performs the actual
/// storage call for one kind's batch; on failure the batch is hung off to
/// `dlq` rather than retried in-process (§4.3).
#[instrument(skip(insert, dlq, shutdown), level = "debug")]
pub fn spawn<F, Fut>(
    tuning: WriterTuning,
    insert: F,
    dlq: Dlq,
    mut shutdown: broadcast::Receiver<()>,
) -> (Writer, tokio::task::JoinHandle<()>)
where
    F: Fn(Batch) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), (Batch, String)>> + Send,
{
    let (tx, mut rx) = mpsc::channel::<Record>(tuning.channel_capacity);

    let handle = tokio::spawn(async move {
        let mut traces = PendingBuffer::<Trace>::default();
        let mut spans = PendingBuffer::<Span>::default();
        let mut logs = PendingBuffer::<Log>::default();
        let mut ticker = tokio::time::interval(tuning.batch_timeout);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_record = rx.recv() => {
                    match maybe_record {
                        Some(record) => {
                            let now = Instant::now();
                            match record {
                                Record::Trace(t) => traces.push(t, now),
                                Record::Span(s) => spans.push(s, now),
                                Record::Log(l) => logs.push(l, now),
                            }
                            flush_if_due(&mut traces, &mut spans, &mut logs, &tuning, &insert, &dlq).await;
                        }
                        None => {
                            tracing::debug!("writer channel closed, flushing remaining buffers");
                            flush_all(&mut traces, &mut spans, &mut logs, &insert, &dlq).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    flush_if_due(&mut traces, &mut spans, &mut logs, &tuning, &insert, &dlq).await;
                }
                _ = shutdown.recv() => {
                    tracing::debug!("writer received shutdown, flushing remaining buffers");
                    flush_all(&mut traces, &mut spans, &mut logs, &insert, &dlq).await;
                    return;
                }
            }
        }
    });

    (Writer { sender: tx }, handle)
}

async fn flush_if_due<F, Fut>(
    traces: &mut PendingBuffer<Trace>,
    spans: &mut PendingBuffer<Span>,
    logs: &mut PendingBuffer<Log>,
    tuning: &WriterTuning,
    insert: &F,
    dlq: &Dlq,
) where
    F: Fn(Batch) -> Fut,
    Fut: std::future::Future<Output = Result<(), (Batch, String)>>,
{
    let now = Instant::now();
    if traces.should_flush(tuning.batch_max, tuning.batch_timeout, now) {
        flush_one(Batch::Traces(traces.take()), insert, dlq).await;
    }
    if spans.should_flush(tuning.batch_max, tuning.batch_timeout, now) {
        flush_one(Batch::Spans(spans.take()), insert, dlq).await;
    }
    if logs.should_flush(tuning.batch_max, tuning.batch_timeout, now) {
        flush_one(Batch::Logs(logs.take()), insert, dlq).await;
    }
}

async fn flush_all<F, Fut>(
    traces: &mut PendingBuffer<Trace>,
    spans: &mut PendingBuffer<Span>,
    logs: &mut PendingBuffer<Log>,
    insert: &F,
    dlq: &Dlq,
) where
    F: Fn(Batch) -> Fut,
    Fut: std::future::Future<Output = Result<(), (Batch, String)>>,
{
    if !traces.records.is_empty() {
        flush_one(Batch::Traces(traces.take()), insert, dlq).await;
    }
    if !spans.records.is_empty() {
        flush_one(Batch::Spans(spans.take()), insert, dlq).await;
    }
    if !logs.records.is_empty() {
        flush_one(Batch::Logs(logs.take()), insert, dlq).await;
    }
}

async fn flush_one<F, Fut>(batch: Batch, insert: &F, dlq: &Dlq)
where
    F: Fn(Batch) -> Fut,
    Fut: std::future::Future<Output = Result<(), (Batch, String)>>,
{
    if batch.is_empty() {
        return;
    }
    let kind = batch.kind();
    let len = batch.len();
    let started = Instant::now();
    match insert(batch).await {
        Ok(()) => {
            metrics::observe_db_latency(kind.as_str(), started.elapsed());
            tracing::debug!(kind = %kind, count = len, "flushed batch to store");
        }
        Err((batch, reason)) => {
            tracing::error!(kind = %kind, count = len, reason, "batch insert failed, spooling to DLQ");
            dlq.enqueue(batch).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Severity, SpanStatus};
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    fn sample_log(n: usize) -> Log {
        Log {
            id: None,
            trace_id: None,
            span_id: None,
            severity: Severity::Info,
            body: format!("message {n}"),
            service_name: "orders".to_string(),
            attributes_json: "{}".to_string(),
            ai_insight: None,
            timestamp: chrono::Utc::now(),
        }
    }

    fn sample_trace() -> Trace {
        Trace {
            trace_id: "a".repeat(32),
            service_name: "orders".to_string(),
            operation: "checkout".to_string(),
            status: SpanStatus::Ok,
            duration_us: 1_000,
            timestamp: chrono::Utc::now(),
            spans: Vec::new(),
        }
    }

    #[tokio::test]
    async fn flush_triggers_on_batch_max() {
        let dir = std::env::temp_dir().join(format!("argus-writer-test-{}", uuid::Uuid::new_v4()));
        let dlq = Dlq::open(&dir).await.unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let flushed: Arc<AsyncMutex<Vec<Batch>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let flushed_clone = flushed.clone();

        let tuning = WriterTuning {
            batch_max: 3,
            batch_timeout: Duration::from_secs(60),
            channel_capacity: 100,
        };
        let (writer, handle) = spawn(
            tuning,
            move |batch: Batch| {
                let flushed = flushed_clone.clone();
                async move {
                    flushed.lock().await.push(batch);
                    Ok(())
                }
            },
            dlq,
            shutdown_rx,
        );

        for i in 0..3 {
            writer.submit(Record::Log(sample_log(i)));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(flushed.lock().await.len(), 1, "batch_max should trigger exactly one flush");

        let _ = shutdown_tx.send(());
        let _ = handle.await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn flush_triggers_on_timeout() {
        let dir = std::env::temp_dir().join(format!("argus-writer-test-{}", uuid::Uuid::new_v4()));
        let dlq = Dlq::open(&dir).await.unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let flushed: Arc<AsyncMutex<Vec<Batch>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let flushed_clone = flushed.clone();

        let tuning = WriterTuning {
            batch_max: 500,
            batch_timeout: Duration::from_millis(50),
            channel_capacity: 100,
        };
        let (writer, handle) = spawn(
            tuning,
            move |batch: Batch| {
                let flushed = flushed_clone.clone();
                async move {
                    flushed.lock().await.push(batch);
                    Ok(())
                }
            },
            dlq,
            shutdown_rx,
        );

        writer.submit(Record::Trace(sample_trace()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(flushed.lock().await.len(), 1, "batch_timeout should trigger a flush");

        let _ = shutdown_tx.send(());
        let _ = handle.await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn shutdown_flushes_partial_buffer() {
        let dir = std::env::temp_dir().join(format!("argus-writer-test-{}", uuid::Uuid::new_v4()));
        let dlq = Dlq::open(&dir).await.unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let flushed: Arc<AsyncMutex<Vec<Batch>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let flushed_clone = flushed.clone();

        let tuning = WriterTuning {
            batch_max: 500,
            batch_timeout: Duration::from_secs(60),
            channel_capacity: 100,
        };
        let (writer, handle) = spawn(
            tuning,
            move |batch: Batch| {
                let flushed = flushed_clone.clone();
                async move {
                    flushed.lock().await.push(batch);
                    Ok(())
                }
            },
            dlq,
            shutdown_rx,
        );

        writer.submit(Record::Log(sample_log(0)));
        let _ = shutdown_tx.send(());
        let _ = handle.await;

        assert_eq!(flushed.lock().await.len(), 1, "shutdown must flush the partial buffer");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
