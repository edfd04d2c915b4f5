//! Dead-Letter Queue (§4.4): a disk-backed spool of failed batches with a
//! periodic replay worker. Parameterized over a `replay` callback rather than
//! a concrete `Store` (§9 "avoiding dispatch over a framework"); owns its own
//! background task and shutdown channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, broadcast};
use tracing::instrument;

use crate::metrics;
use crate::model::{Batch, RecordKind};

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("failed to create DLQ directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write DLQ file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The on-disk envelope (§6): `{kind, enqueued_at, records}`.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    kind: RecordKind,
    enqueued_at: chrono::DateTime<chrono::Utc>,
    records: serde_json::Value,
}

/// Disk-backed spool under `path` (default `./data/dlq`, §6). Writes are
/// serialized by an internal mutex (§5 "protected by a mutex for enqueue and
/// the replay scan") so two concurrent failed flushes never race on a
/// filename.
#[derive(Debug, Clone)]
pub struct Dlq {
    path: Arc<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl Dlq {
    /// Creates the spool directory if absent. A failure here is a fatal
    /// startup error (§6/§7).
    #[instrument(name = "dlq::open", target = "dlq", level = "debug")]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DlqError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)
            .await
            .map_err(|source| DlqError::CreateDir { path: path.clone(), source })?;
        Ok(Self { path: Arc::new(path), write_lock: Arc::new(Mutex::new(())) })
    }

    /// Serializes `batch` and writes it to `batch_<nanos>.json` (§4.4).
    /// Writes go to a temp path in the same directory and are renamed into
    /// place so a crash mid-write can never leave a half-written `*.json`
    /// file for the replay worker to choke on (§6 atomicity note).
    #[instrument(skip(self, batch), fields(kind = %batch.kind()), level = "debug")]
    pub async fn enqueue(&self, batch: Batch) {
        if let Err(err) = self.try_enqueue(batch).await {
            tracing::error!(error = %err, "DLQ write failed — batch is permanently lost");
            metrics::DLQ_WRITE_FAILURES.inc();
        }
    }

    async fn try_enqueue(&self, batch: Batch) -> Result<(), DlqError> {
        let kind = batch.kind();
        let records = match batch {
            Batch::Traces(v) => serde_json::to_value(v)?,
            Batch::Spans(v) => serde_json::to_value(v)?,
            Batch::Logs(v) => serde_json::to_value(v)?,
        };
        let envelope = Envelope { kind, enqueued_at: chrono::Utc::now(), records };
        let bytes = serde_json::to_vec(&envelope)?;

        let _guard = self.write_lock.lock().await;
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let final_path = self.path.join(format!("batch_{nanos}.json"));
        let tmp_path = self.path.join(format!("batch_{nanos}.json.tmp"));

        fs::write(&tmp_path, &bytes)
            .await
            .map_err(|source| DlqError::Write { path: tmp_path.clone(), source })?;
        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|source| DlqError::Write { path: final_path.clone(), source })?;

        tracing::debug!(path = %final_path.display(), "spooled failed batch to DLQ");
        metrics::DLQ_SIZE.set(self.count_files().await as f64);
        Ok(())
    }

    async fn count_files(&self) -> usize {
        list_json_files(&self.path).await.len()
    }

    /// Current `*.json` file count, refreshed on demand (§4.4 observability;
    /// used by `/api/health`).
    pub async fn size(&self) -> usize {
        self.count_files().await
    }

    /// Spawns the replay worker, ticking every `interval`. `replay` re-issues
    /// the batched insert for a decoded envelope; it is handed the kind and
    /// the raw `records` JSON so it stays storage-agnostic at this layer.
    #[instrument(skip(self, replay, shutdown), level = "debug")]
    pub fn spawn_replay_worker<F, Fut>(
        &self,
        interval: Duration,
        replay: F,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(RecordKind, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send,
    {
        let dlq = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        dlq.replay_once(&replay).await;
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("DLQ replay worker finishing in-flight replay before shutdown");
                        dlq.replay_once(&replay).await;
                        tracing::debug!("DLQ replay worker stopped");
                        return;
                    }
                }
            }
        })
    }

    /// Runs a single replay pass (§4.4 step-by-step contract). Exposed so
    /// tests and `/api/health` (§4.4 "refreshed ... after each replay cycle")
    /// can trigger it deterministically.
    pub async fn replay_once<F, Fut>(&self, replay: &F)
    where
        F: Fn(RecordKind, serde_json::Value) -> Fut,
        Fut: std::future::Future<Output = Result<(), String>>,
    {
        let files = list_json_files(&self.path).await;
        for path in files {
            let bytes = match fs::read(&path).await {
                Ok(b) => b,
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "failed to read DLQ file");
                    continue;
                }
            };
            let envelope: Envelope = match serde_json::from_slice(&bytes) {
                Ok(e) => e,
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "failed to deserialize DLQ file, leaving in place");
                    continue;
                }
            };

            match replay(envelope.kind, envelope.records).await {
                Ok(()) => {
                    if let Err(err) = fs::remove_file(&path).await {
                        tracing::error!(path = %path.display(), error = %err, "replayed batch but failed to remove DLQ file");
                    } else {
                        metrics::DLQ_REPLAYED.inc();
                        tracing::debug!(path = %path.display(), "DLQ batch replayed successfully");
                    }
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), reason, "DLQ replay failed, retrying next tick");
                }
            }
        }
        metrics::DLQ_SIZE.set(self.count_files().await as f64);
    }
}

/// Lists `*.json` files sorted by filename (nanos -> chronological order,
/// §4.4 step 1). Anything else (e.g. a leftover `.tmp` file) is ignored.
async fn list_json_files(dir: &Path) -> Vec<PathBuf> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::error!(path = %dir.display(), error = %err, "failed to list DLQ directory");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    files.push(path);
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::error!(error = %err, "failed reading DLQ directory entry");
                break;
            }
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Log, Severity, SpanStatus, Trace};

    fn sample_log() -> Log {
        Log {
            id: None,
            trace_id: None,
            span_id: None,
            severity: Severity::Info,
            body: "hello".to_string(),
            service_name: "order".to_string(),
            attributes_json: "{}".to_string(),
            ai_insight: None,
            timestamp: chrono::Utc::now(),
        }
    }

    fn sample_trace() -> Trace {
        Trace {
            trace_id: "a".repeat(32),
            service_name: "order".to_string(),
            operation: "checkout".to_string(),
            status: SpanStatus::Ok,
            duration_us: 1000,
            timestamp: chrono::Utc::now(),
            spans: Vec::new(),
        }
    }

    #[tokio::test]
    async fn enqueue_writes_one_json_file_and_no_tmp_survives() {
        let dir = tempdir();
        let dlq = Dlq::open(&dir).await.unwrap();
        dlq.enqueue(Batch::Logs(vec![sample_log()])).await;

        let files = list_json_files(&dir).await;
        assert_eq!(files.len(), 1);
        assert_eq!(dlq.size().await, 1);

        let mut read_dir = std::fs::read_dir(&dir).unwrap();
        assert!(read_dir.all(|e| !e.unwrap().path().to_string_lossy().ends_with(".tmp")));
    }

    #[tokio::test]
    async fn replay_deletes_file_only_on_success() {
        let dir = tempdir();
        let dlq = Dlq::open(&dir).await.unwrap();
        dlq.enqueue(Batch::Traces(vec![sample_trace()])).await;
        assert_eq!(dlq.size().await, 1);

        dlq.replay_once(&|_kind, _records| async { Err("still down".to_string()) }).await;
        assert_eq!(dlq.size().await, 1, "failed replay must leave the file in place");

        dlq.replay_once(&|_kind, _records| async { Ok(()) }).await;
        assert_eq!(dlq.size().await, 0, "successful replay must delete the file");
    }

    #[tokio::test]
    async fn non_json_files_are_ignored() {
        let dir = tempdir();
        let dlq = Dlq::open(&dir).await.unwrap();
        std::fs::write(dir.join("stray.txt"), b"not a batch").unwrap();
        assert_eq!(dlq.size().await, 0);
    }

    /// Minimal scoped-tempdir helper (no external crate dependency): a
    /// unique subdirectory under `std::env::temp_dir()`, deleted on drop.
    struct TempDir(PathBuf);

    impl std::ops::Deref for TempDir {
        type Target = Path;
        fn deref(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn tempdir() -> TempDir {
        let dir = std::env::temp_dir().join(format!("argus-dlq-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        TempDir(dir)
    }
}
