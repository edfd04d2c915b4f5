//! OTLP gRPC receivers (§4.2): `TraceService.Export` and
//! `LogsService.Export`, decoding ResourceSpans/ResourceLogs, normalizing
//! them, and handing admitted records to the writer and the two hubs.
//! Grounded on the same receive-normalize-enqueue shape as a conventional
//! OTLP gRPC collector, generalized here to the core's own filter/writer/hub
//! pipeline instead of a message-bus publisher.

mod logs_service;
mod trace_service;

pub use logs_service::OtlpLogsService;
pub use trace_service::OtlpTraceService;

use std::sync::Arc;

use argus_proto::collector::logs::logs_service_server::LogsServiceServer;
use argus_proto::collector::trace::trace_service_server::TraceServiceServer;
use tonic::codec::CompressionEncoding;
use tonic::transport::Server;

use crate::filter::FilterConfig;
use crate::hub::{BroadcastHub, SnapshotHub};
use crate::writer::Writer;

/// Maximum decoded/encoded message size accepted on either service. OTLP
/// exporters can legitimately batch thousands of spans per call; this
/// leaves headroom well above a pathological single-call payload while
/// still bounding worst-case memory per request.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Runs the gRPC server until `shutdown` resolves (§5 "receivers reject new
/// RPCs" on shutdown).
pub async fn serve(
    addr: std::net::SocketAddr,
    filter: FilterConfig,
    writer: Writer,
    broadcast_hub: BroadcastHub,
    snapshot_hub: SnapshotHub,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), tonic::transport::Error> {
    let filter = Arc::new(filter);

    let trace_service =
        OtlpTraceService::new(filter.clone(), writer.clone(), snapshot_hub.clone());
    let logs_service = OtlpLogsService::new(filter, writer, broadcast_hub, snapshot_hub);

    tracing::info!(%addr, "starting OTLP gRPC server");

    Server::builder()
        .add_service(
            TraceServiceServer::new(trace_service)
                .accept_compressed(CompressionEncoding::Gzip)
                .max_decoding_message_size(MAX_MESSAGE_SIZE)
                .max_encoding_message_size(MAX_MESSAGE_SIZE),
        )
        .add_service(
            LogsServiceServer::new(logs_service)
                .accept_compressed(CompressionEncoding::Gzip)
                .max_decoding_message_size(MAX_MESSAGE_SIZE)
                .max_encoding_message_size(MAX_MESSAGE_SIZE),
        )
        .serve_with_shutdown(addr, shutdown)
        .await
}
