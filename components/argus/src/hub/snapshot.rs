//! Snapshot Hub (§4.6): periodically recomputes an aggregated dashboard view
//! and pushes it to every connected client, each optionally scoped to one
//! service. Decoupled from ingest by a debounce timer so a burst of traffic
//! cannot turn every admitted record into a recompute.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use crate::metrics;
use crate::model::Trace;
use crate::storage::{DashboardAggregates, ServiceMap, Store, TrafficBucket};

/// Most recent traces included in a snapshot (§4.6 "capped").
const RECENT_TRACES_LIMIT: usize = 50;

/// A single dashboard push (§4.6 "Snapshot payload").
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub aggregates: DashboardAggregates,
    pub traffic: Vec<TrafficBucket>,
    pub recent_traces: Vec<Trace>,
    pub service_map: ServiceMap,
}

/// An inbound filter message (§4.6): `{"service": "<name>"}`. An empty or
/// absent `service` means "all services".
#[derive(Debug, Deserialize)]
struct FilterMessage {
    #[serde(default)]
    service: Option<String>,
}

#[derive(Debug)]
pub struct ClientHandle {
    pub id: Uuid,
    pub sender: mpsc::Sender<Message>,
}

#[derive(Debug, Clone)]
pub struct SnapshotHub {
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<Uuid>,
    filter_tx: mpsc::Sender<(Uuid, String)>,
    refresh_tx: mpsc::Sender<()>,
}

impl SnapshotHub {
    pub async fn register(&self, handle: ClientHandle) {
        let _ = self.register_tx.send(handle).await;
    }

    pub async fn unregister(&self, id: Uuid) {
        let _ = self.unregister_tx.send(id).await;
    }

    /// Applies a raw text frame as this client's service filter. The hub
    /// task validates it and disconnects the client on malformed input
    /// (§4.6).
    pub async fn set_filter(&self, id: Uuid, raw: String) {
        let _ = self.filter_tx.send((id, raw)).await;
    }

    /// Requests a recompute. Coalesced with any other pending request inside
    /// the debounce window (§4.6 "Trigger model").
    pub fn notify_refresh(&self) {
        let _ = self.refresh_tx.try_send(());
    }
}

struct Client {
    sender: mpsc::Sender<Message>,
    filter: Option<String>,
}

/// Spawns the snapshot hub's background task.
#[instrument(skip(store, shutdown), level = "debug")]
pub fn spawn<S: Store>(
    store: Arc<S>,
    window: chrono::Duration,
    debounce: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> (SnapshotHub, tokio::task::JoinHandle<()>) {
    let (register_tx, mut register_rx) = mpsc::channel::<ClientHandle>(64);
    let (unregister_tx, mut unregister_rx) = mpsc::channel::<Uuid>(64);
    let (filter_tx, mut filter_rx) = mpsc::channel::<(Uuid, String)>(256);
    let (refresh_tx, mut refresh_rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        let mut clients: HashMap<Uuid, Client> = HashMap::new();
        let mut cache: HashMap<Option<String>, Snapshot> = HashMap::new();
        let mut pending_refresh = true; // compute an initial snapshot as soon as a client appears
        let mut next_allowed = Instant::now();

        loop {
            tokio::select! {
                Some(client) = register_rx.recv() => {
                    tracing::debug!(client_id = %client.id, "snapshot client connected");
                    clients.insert(client.id, Client { sender: client.sender, filter: None });
                    metrics::ACTIVE_CONNECTIONS.inc();
                    pending_refresh = true;
                }
                Some(id) = unregister_rx.recv() => {
                    if clients.remove(&id).is_some() {
                        tracing::debug!(client_id = %id, "snapshot client disconnected");
                        metrics::ACTIVE_CONNECTIONS.dec();
                    }
                }
                Some((id, raw)) = filter_rx.recv() => {
                    match serde_json::from_str::<FilterMessage>(&raw) {
                        Ok(msg) => {
                            let filter = msg.service.filter(|s| !s.is_empty());
                            if let Some(client) = clients.get_mut(&id) {
                                client.filter = filter;
                            }
                        }
                        Err(err) => {
                            tracing::debug!(client_id = %id, error = %err, "invalid snapshot filter message, disconnecting client");
                            clients.remove(&id);
                            metrics::ACTIVE_CONNECTIONS.dec();
                        }
                    }
                }
                Some(()) = refresh_rx.recv() => {
                    pending_refresh = true;
                }
                _ = tokio::time::sleep_until(next_allowed), if pending_refresh => {
                    recompute_and_push(&store, window, &mut clients, &mut cache).await;
                    pending_refresh = false;
                    next_allowed = Instant::now() + debounce;
                }
                _ = shutdown.recv() => {
                    tracing::debug!("snapshot hub shutting down, closing clients");
                    for (_, client) in clients.drain() {
                        drop(client.sender);
                    }
                    return;
                }
            }
        }
    });

    (SnapshotHub { register_tx, unregister_tx, filter_tx, refresh_tx }, handle)
}

/// Groups clients by filter, computes one snapshot per distinct filter, and
/// pushes it to every client sharing that filter. A failed computation
/// falls back to the last successful snapshot for that filter (§4.6
/// "Failure").
async fn recompute_and_push<S: Store>(
    store: &Arc<S>,
    window: chrono::Duration,
    clients: &mut HashMap<Uuid, Client>,
    cache: &mut HashMap<Option<String>, Snapshot>,
) {
    let mut filters: Vec<Option<String>> = clients.values().map(|c| c.filter.clone()).collect();
    filters.sort();
    filters.dedup();

    for filter in filters {
        match compute_snapshot(store, window, filter.as_deref()).await {
            Ok(snapshot) => {
                cache.insert(filter.clone(), snapshot);
            }
            Err(err) => {
                tracing::error!(filter = ?filter, error = %err, "snapshot computation failed, re-sending last snapshot");
            }
        }
    }

    let mut shed = Vec::new();
    for (id, client) in clients.iter() {
        let Some(snapshot) = cache.get(&client.filter) else { continue };
        let payload = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize snapshot");
                continue;
            }
        };
        if client.sender.try_send(Message::Text(payload.into())).is_err() {
            shed.push(*id);
        }
    }
    for id in shed {
        if clients.remove(&id).is_some() {
            tracing::debug!(client_id = %id, "shedding slow snapshot client");
            metrics::ACTIVE_CONNECTIONS.dec();
        }
    }
}

async fn compute_snapshot<S: Store>(
    store: &Arc<S>,
    window: chrono::Duration,
    service: Option<&str>,
) -> Result<Snapshot, crate::storage::StoreError> {
    let aggregates = store.dashboard_aggregates(window, service).await?;
    let traffic = store.traffic_series(window, service).await?;
    let recent_traces = store.recent_traces(window, service, RECENT_TRACES_LIMIT).await?;
    let service_map = store.service_map(window).await?;
    Ok(Snapshot { aggregates, traffic, recent_traces, service_map })
}
