//! Wires the six ingest/broadcast components and the ambient stack into one
//! running process (§2, §5): one `Shutdown` broadcaster fans out to every
//! long-lived task, including a gRPC listener and a second (HTTP/WebSocket)
//! listener running side by side.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::config::Config;
use crate::dlq::Dlq;
use crate::grpc;
use crate::helpers::shutdown::Shutdown;
use crate::hub::{broadcast, snapshot};
use crate::model::{Batch, Log, RecordKind, Span, Trace};
use crate::server::{self, AppState};
use crate::storage::SqliteStore;
use crate::storage::Store as _;
use crate::writer;

/// Upper bound on how long shutdown is allowed to take (§5 "Cancellation").
/// Any task still running past this deadline is abandoned — its unflushed
/// in-memory data never reached durability, so losing it is acceptable.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Runs the ingest-to-broadcast core until a shutdown signal (Ctrl+C or an
/// internally triggered `Shutdown`) is received, then drains every
/// long-lived task within [`SHUTDOWN_DEADLINE`].
#[instrument(name = "runtime::run", target = "runtime::runtime", skip_all, level = "info")]
pub async fn run() -> Result<()> {
    tracing::info!("starting argus ingest core");

    let cfg = Config::load().context("failed to load configuration")?;
    tracing::info!(?cfg, "configuration loaded");

    let shutdown = Shutdown::new();
    let shutdown_on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, triggering graceful shutdown");
            shutdown_on_ctrl_c.trigger();
        }
    });

    let store = Arc::new(
        SqliteStore::open(&cfg.db.dsn)
            .with_context(|| format!("failed to open store at {:?}", cfg.db.dsn))?,
    );

    let dlq = Dlq::open(&cfg.dlq.path)
        .await
        .with_context(|| format!("failed to create DLQ directory {:?}", cfg.dlq.path))?;

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    let (broadcast_hub, broadcast_handle) = broadcast::spawn(shutdown.subscribe());
    handles.push(broadcast_handle);

    let (snapshot_hub, snapshot_handle) = snapshot::spawn(
        store.clone(),
        cfg.snapshot.window,
        cfg.snapshot.debounce,
        shutdown.subscribe(),
    );
    handles.push(snapshot_handle);

    let (writer, writer_handle) = writer::spawn(
        writer_tuning(&cfg),
        insert_callback(store.clone()),
        dlq.clone(),
        shutdown.subscribe(),
    );
    handles.push(writer_handle);

    let dlq_replay_handle = dlq.spawn_replay_worker(
        cfg.dlq.replay_interval,
        replay_callback(store.clone()),
        shutdown.subscribe(),
    );
    handles.push(dlq_replay_handle);

    let grpc_addr: SocketAddr =
        format!("0.0.0.0:{}", cfg.server.grpc_port).parse().context("invalid GRPC_PORT")?;
    let grpc_filter = cfg.ingest.clone();
    let grpc_writer = writer.clone();
    let grpc_broadcast = broadcast_hub.clone();
    let grpc_snapshot = snapshot_hub.clone();
    let grpc_shutdown = await_shutdown(shutdown.subscribe());
    let grpc_handle = tokio::spawn(async move {
        if let Err(err) = grpc::serve(
            grpc_addr,
            grpc_filter,
            grpc_writer,
            grpc_broadcast,
            grpc_snapshot,
            grpc_shutdown,
        )
        .await
        {
            tracing::error!(error = %err, "OTLP gRPC server error");
        }
    });
    handles.push(grpc_handle);

    let http_addr: SocketAddr =
        format!("0.0.0.0:{}", cfg.server.http_port).parse().context("invalid HTTP_PORT")?;
    let http_state = AppState { broadcast_hub, snapshot_hub, dlq };
    let http_shutdown = await_shutdown(shutdown.subscribe());
    let http_handle = tokio::spawn(async move {
        if let Err(err) = server::serve(http_addr, http_state, http_shutdown).await {
            tracing::error!(error = %err, "realtime HTTP server error");
        }
    });
    handles.push(http_handle);

    tracing::info!(%grpc_addr, %http_addr, "argus ingest core running");

    shutdown.wait_for_shutdown().await;
    tracing::info!("shutdown signal received, draining tasks");

    match tokio::time::timeout(SHUTDOWN_DEADLINE, futures::future::join_all(handles)).await {
        Ok(_) => tracing::info!("all tasks drained, exiting cleanly"),
        Err(_) => tracing::warn!("shutdown deadline exceeded, abandoning remaining tasks"),
    }

    Ok(())
}

fn writer_tuning(cfg: &Config) -> writer::WriterTuning {
    writer::WriterTuning {
        batch_max: cfg.writer.batch_max,
        batch_timeout: cfg.writer.batch_timeout,
        ..writer::WriterTuning::default()
    }
}

/// Resolves once `shutdown` fires; handed to the gRPC and HTTP servers as
/// their graceful-shutdown future (§5 "receivers reject new RPCs").
fn await_shutdown(
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> impl std::future::Future<Output = ()> + Send + 'static {
    async move {
        let _ = shutdown.recv().await;
    }
}

type BoxFuture<T> = Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Builds the writer's `insert` callback (§9 "avoiding dispatch over a
/// framework"): on failure, the batch is handed back so the writer can spool
/// it to the DLQ without the callback needing to know about the DLQ at all.
fn insert_callback(
    store: Arc<SqliteStore>,
) -> impl Fn(Batch) -> BoxFuture<Result<(), (Batch, String)>> + Send + Sync + 'static {
    move |batch: Batch| {
        let store = store.clone();
        Box::pin(async move {
            let result = match &batch {
                Batch::Traces(v) => store.insert_traces_batch(v).await,
                Batch::Spans(v) => store.insert_spans_batch(v).await,
                Batch::Logs(v) => store.insert_logs_batch(v).await,
            };
            match result {
                Ok(()) => Ok(()),
                Err(err) => Err((batch, err.to_string())),
            }
        })
    }
}

/// Builds the DLQ's `replay` callback: deserializes the spooled JSON back
/// into typed records for the kind named in the envelope and re-issues the
/// same batched insert the writer would have made.
fn replay_callback(
    store: Arc<SqliteStore>,
) -> impl Fn(RecordKind, serde_json::Value) -> BoxFuture<Result<(), String>> + Send + Sync + 'static
{
    move |kind: RecordKind, records: serde_json::Value| {
        let store = store.clone();
        Box::pin(async move {
            match kind {
                RecordKind::Trace => {
                    let traces: Vec<Trace> =
                        serde_json::from_value(records).map_err(|e| e.to_string())?;
                    store.insert_traces_batch(&traces).await.map_err(|e| e.to_string())
                }
                RecordKind::Span => {
                    let spans: Vec<Span> =
                        serde_json::from_value(records).map_err(|e| e.to_string())?;
                    store.insert_spans_batch(&spans).await.map_err(|e| e.to_string())
                }
                RecordKind::Log => {
                    let logs: Vec<Log> =
                        serde_json::from_value(records).map_err(|e| e.to_string())?;
                    store.insert_logs_batch(&logs).await.map_err(|e| e.to_string())
                }
            }
        })
    }
}
