use std::sync::Arc;

use argus_proto::collector::trace::trace_service_server::TraceService;
use argus_proto::collector::trace::{ExportTraceServiceRequest, ExportTraceServiceResponse};
use tonic::{Request, Response, Status};
use tracing::instrument;

use crate::filter::{self, FilterConfig};
use crate::hub::SnapshotHub;
use crate::metrics;
use crate::otlp;
use crate::writer::{Record, Writer};

/// `TraceService.Export` (§4.2): decodes `ResourceSpans`, normalizes each
/// span, filters (traces are never severity-filtered, §4.1), and hands
/// admitted records to the writer and the snapshot hub. Never suspends after
/// decoding — every downstream handoff is a non-blocking channel send. Traces
/// do not stream to the broadcast hub (§4.5 covers log entries only).
#[derive(Debug)]
pub struct OtlpTraceService {
    filter: Arc<FilterConfig>,
    writer: Writer,
    snapshot_hub: SnapshotHub,
}

impl OtlpTraceService {
    pub fn new(filter: Arc<FilterConfig>, writer: Writer, snapshot_hub: SnapshotHub) -> Self {
        Self { filter, writer, snapshot_hub }
    }
}

#[tonic::async_trait]
impl TraceService for OtlpTraceService {
    #[instrument(skip(self, request), level = "debug")]
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let req = request.into_inner();
        let mut admitted = 0u64;

        for resource_spans in &req.resource_spans {
            let service_name = otlp::extract_service_name(resource_spans.resource.as_ref());

            // deny-list/allow-list checked once per resource (traces are never severity-filtered).
            if !filter::evaluate_and_record(&self.filter, &service_name, None).is_admit() {
                continue;
            }

            for scope_spans in &resource_spans.scope_spans {
                for proto_span in &scope_spans.spans {
                    let normalized = otlp::normalize_span(proto_span, &service_name);

                    self.writer.submit(Record::Span(normalized.span.clone()));
                    if let Some(trace) = normalized.trace {
                        self.writer.submit(Record::Trace(trace));
                    }

                    self.snapshot_hub.notify_refresh();
                    admitted += 1;
                }
            }
        }

        if admitted > 0 {
            metrics::INGESTION_RATE.with_label_values(&["span"]).inc_by(admitted as f64);
        }

        Ok(Response::new(ExportTraceServiceResponse { partial_success: None }))
    }
}
