use std::sync::Arc;

use argus_proto::collector::logs::logs_service_server::LogsService;
use argus_proto::collector::logs::{ExportLogsServiceRequest, ExportLogsServiceResponse};
use tonic::{Request, Response, Status};
use tracing::instrument;

use crate::filter::{self, FilterConfig};
use crate::hub::{BroadcastHub, SnapshotHub};
use crate::metrics;
use crate::otlp;
use crate::writer::{Record, Writer};

/// `LogsService.Export` (§4.2): decodes `ResourceLogs`, normalizes each log
/// record, filters by severity and service allow/deny lists, and hands
/// admitted records to the writer and both hubs. Never suspends after
/// decoding — every downstream handoff is a non-blocking channel send.
#[derive(Debug)]
pub struct OtlpLogsService {
    filter: Arc<FilterConfig>,
    writer: Writer,
    broadcast_hub: BroadcastHub,
    snapshot_hub: SnapshotHub,
}

impl OtlpLogsService {
    pub fn new(
        filter: Arc<FilterConfig>,
        writer: Writer,
        broadcast_hub: BroadcastHub,
        snapshot_hub: SnapshotHub,
    ) -> Self {
        Self { filter, writer, broadcast_hub, snapshot_hub }
    }
}

#[tonic::async_trait]
impl LogsService for OtlpLogsService {
    #[instrument(skip(self, request), level = "debug")]
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        let req = request.into_inner();
        let mut admitted = 0u64;

        for resource_logs in &req.resource_logs {
            let service_name = otlp::extract_service_name(resource_logs.resource.as_ref());

            for scope_logs in &resource_logs.scope_logs {
                for proto_log in &scope_logs.log_records {
                    let normalized = otlp::normalize_log(proto_log, &service_name);

                    if !filter::evaluate_and_record(
                        &self.filter,
                        &service_name,
                        Some(normalized.severity),
                    )
                    .is_admit()
                    {
                        continue;
                    }

                    self.broadcast_hub.notify_new(normalized.clone());
                    self.writer.submit(Record::Log(normalized));
                    self.snapshot_hub.notify_refresh();
                    admitted += 1;
                }
            }
        }

        if admitted > 0 {
            metrics::INGESTION_RATE.with_label_values(&["log"]).inc_by(admitted as f64);
        }

        Ok(Response::new(ExportLogsServiceResponse { partial_success: None }))
    }
}
