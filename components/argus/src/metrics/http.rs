//! `GET /metrics` handler, served by the realtime HTTP server (`server::mod`)
//! alongside the WebSocket hubs: gathers the global Prometheus registry and
//! text-encodes it, as an `axum` handler rather than a standalone listener so
//! the same process can multiplex `/metrics`, `/api/health`, and the two
//! WebSocket upgrades on one port.

use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use prometheus::{Encoder, TextEncoder};
use tracing::instrument;

#[instrument(name = "metrics::http::handler", target = "metrics::http", level = "debug")]
pub async fn metrics_handler() -> impl IntoResponse {
    let metric_families = prometheus::gather();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer)
        .into_response()
}
