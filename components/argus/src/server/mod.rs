//! The realtime HTTP surface (§6): `GET /ws/logs` and `GET /ws/dashboard`
//! WebSocket upgrades for the two hubs, plus `GET /metrics` and
//! `GET /api/health`, all multiplexed on one `axum` router — chosen over a
//! raw `hyper` listener because it gives WebSocket upgrades for free
//! alongside the same plain HTTP handlers.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::dlq::Dlq;
use crate::hub::{BroadcastHub, SnapshotHub};
use crate::hub::broadcast::ClientHandle as BroadcastClientHandle;
use crate::hub::snapshot::ClientHandle as SnapshotClientHandle;
use crate::metrics;

/// Per-connection WebSocket write timeout (§5 "Timeouts").
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-client outbound channel capacity, mirroring the hubs' own internal
/// per-client channel capacity (§4.5) so the server layer never becomes the
/// bottleneck the hub is already built to shed around.
const CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub broadcast_hub: BroadcastHub,
    pub snapshot_hub: SnapshotHub,
    pub dlq: Dlq,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    dlq_size: usize,
}

#[instrument(name = "server::health", target = "server", level = "debug")]
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(HealthBody { status: "ok", dlq_size: state.dlq.size().await })
}

async fn ws_logs_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_broadcast_socket(socket, state.broadcast_hub))
}

async fn ws_dashboard_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_snapshot_socket(socket, state.snapshot_hub))
}

/// Drives one Broadcast Hub client connection (§4.5 state machine):
/// CONNECTED on upgrade, CLOSING on read/write failure or hub shedding,
/// CLOSED once both halves have wound down. No client-to-server message on
/// this channel is acted on — the reader only drains to detect close.
#[instrument(skip(socket, hub), level = "debug")]
async fn handle_broadcast_socket(socket: WebSocket, hub: BroadcastHub) {
    let id = Uuid::new_v4();
    let (tx, rx) = tokio::sync::mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    hub.register(BroadcastClientHandle { id, sender: tx }).await;

    let (sink, mut stream) = socket.split();

    let reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            if msg.is_err() {
                break;
            }
            if matches!(msg, Ok(Message::Close(_))) {
                break;
            }
        }
    });

    drive_client_writer(sink, rx).await;
    reader.abort();
    hub.unregister(id).await;
}

/// Drives one Snapshot Hub client connection. Unlike the broadcast channel,
/// incoming text frames here are meaningful: a `{"service": "<name>"}`
/// filter message (§4.6). Forwarded to the hub task, which disconnects the
/// client itself (by dropping its sender) on malformed input; we just need
/// to notice the resulting channel close and tear down the socket.
#[instrument(skip(socket, hub), level = "debug")]
async fn handle_snapshot_socket(socket: WebSocket, hub: SnapshotHub) {
    let id = Uuid::new_v4();
    let (tx, rx) = tokio::sync::mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    hub.register(SnapshotClientHandle { id, sender: tx }).await;

    let (sink, mut stream) = socket.split();

    let reader_hub = hub.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    reader_hub.set_filter(id, text.to_string()).await;
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    drive_client_writer(sink, rx).await;
    reader.abort();
    hub.unregister(id).await;
}

/// Pumps hub-pushed messages to the socket sink until the hub closes the
/// channel (shedding this client, §4.5) or a write exceeds
/// [`WRITE_TIMEOUT`], at which point the connection is torn down.
async fn drive_client_writer(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: tokio::sync::mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        match tokio::time::timeout(WRITE_TIMEOUT, sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_elapsed) => {
                tracing::debug!("websocket write timed out, closing connection");
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// Builds the router. Separated from [`serve`] so tests can mount it on an
/// in-process `axum::Router` without binding a real socket.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/logs", get(ws_logs_handler))
        .route("/ws/dashboard", get(ws_dashboard_handler))
        .route("/metrics", get(metrics::http::metrics_handler))
        .route("/api/health", get(health_handler))
        .with_state(state)
}

/// Serves the router until `shutdown` resolves (§5 graceful drain).
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "starting realtime HTTP server");
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await
}
