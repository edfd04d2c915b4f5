//! WebSocket fan-out (§4.5, §4.6): two independent hubs sharing nothing but
//! the `argus_active_connections` gauge — a per-entry stream of raw log
//! batches and a periodic aggregated snapshot.

pub mod broadcast;
pub mod snapshot;

pub use broadcast::BroadcastHub;
pub use snapshot::SnapshotHub;
