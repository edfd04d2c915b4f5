//! Broadcast Hub (§4.5): per-entry WebSocket fan-out of admitted log
//! entries. A single task owns the client set; callers only ever talk to it
//! through bounded channels, never by touching shared mutable state.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use crate::metrics;
use crate::model::Log;

const BROADCAST_CHANNEL_CAPACITY: usize = 5_000;
const PER_CLIENT_CHANNEL_CAPACITY: usize = 256;
const FLUSH_BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Handle a WebSocket connection registers with to receive broadcast
/// frames. Dropping it (or the hub shedding it on a full channel) ends the
/// connection's writer task.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: Uuid,
    pub sender: mpsc::Sender<Message>,
}

/// Handle held by OTLP receivers and by WebSocket handlers performing
/// registration. Cheap to clone: every clone shares the same background
/// task.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<Uuid>,
    entry_tx: mpsc::Sender<Log>,
}

impl BroadcastHub {
    /// Registers a new client. The caller owns the receiving half of the
    /// channel handed back to it when it constructed `sender`.
    pub async fn register(&self, handle: ClientHandle) {
        let _ = self.register_tx.send(handle).await;
    }

    pub async fn unregister(&self, id: Uuid) {
        let _ = self.unregister_tx.send(id).await;
    }

    /// Non-blocking submission of a new log entry (§4.5 "Submit contract").
    /// Overflow silently drops the entry — the UI stream is advisory.
    pub fn notify_new(&self, log: Log) {
        if self.entry_tx.try_send(log).is_err() {
            tracing::debug!("broadcast hub entry channel full, dropping log entry");
        }
    }
}

struct Client {
    sender: mpsc::Sender<Message>,
}

/// Spawns the hub's background task and returns the handle callers use.
#[instrument(skip(shutdown), level = "debug")]
pub fn spawn(mut shutdown: tokio::sync::broadcast::Receiver<()>) -> (BroadcastHub, tokio::task::JoinHandle<()>) {
    let (register_tx, mut register_rx) = mpsc::channel::<ClientHandle>(64);
    let (unregister_tx, mut unregister_rx) = mpsc::channel::<Uuid>(64);
    let (entry_tx, mut entry_rx) = mpsc::channel::<Log>(BROADCAST_CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        let mut clients: HashMap<Uuid, Client> = HashMap::new();
        let mut pending: Vec<Log> = Vec::with_capacity(FLUSH_BATCH_SIZE);
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_flush = Instant::now();

        loop {
            tokio::select! {
                Some(client) = register_rx.recv() => {
                    tracing::debug!(client_id = %client.id, "broadcast client connected");
                    clients.insert(client.id, Client { sender: client.sender });
                    metrics::ACTIVE_CONNECTIONS.inc();
                }
                Some(id) = unregister_rx.recv() => {
                    if clients.remove(&id).is_some() {
                        tracing::debug!(client_id = %id, "broadcast client disconnected");
                        metrics::ACTIVE_CONNECTIONS.dec();
                    }
                }
                maybe_entry = entry_rx.recv() => {
                    match maybe_entry {
                        Some(entry) => {
                            pending.push(entry);
                            if pending.len() >= FLUSH_BATCH_SIZE {
                                flush(&mut pending, &mut clients).await;
                                last_flush = Instant::now();
                            }
                        }
                        None => {
                            flush(&mut pending, &mut clients).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !pending.is_empty() || last_flush.elapsed() >= FLUSH_INTERVAL {
                        flush(&mut pending, &mut clients).await;
                        last_flush = Instant::now();
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("broadcast hub shutting down, flushing and closing clients");
                    flush(&mut pending, &mut clients).await;
                    for (_, client) in clients.drain() {
                        drop(client.sender);
                    }
                    return;
                }
            }
        }
    });

    (BroadcastHub { register_tx, unregister_tx, entry_tx }, handle)
}

/// Flushes pending entries to every connected client as one JSON array
/// text frame. A client whose channel is full is dropped (§4.5 slow-client
/// policy) rather than blocking the flush.
async fn flush(pending: &mut Vec<Log>, clients: &mut HashMap<Uuid, Client>) {
    if pending.is_empty() || clients.is_empty() {
        pending.clear();
        return;
    }

    let payload = match serde_json::to_string(&pending) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize broadcast batch");
            pending.clear();
            return;
        }
    };
    pending.clear();

    let mut shed = Vec::new();
    for (id, client) in clients.iter() {
        if client.sender.try_send(Message::Text(payload.clone().into())).is_err() {
            shed.push(*id);
        }
    }
    for id in shed {
        if clients.remove(&id).is_some() {
            tracing::debug!(client_id = %id, "shedding slow broadcast client");
            metrics::ACTIVE_CONNECTIONS.dec();
        }
    }
}
