//! The three record kinds that flow through the ingest-to-broadcast pipeline:
//! [`Trace`], [`Span`] and [`Log`]. All three are plain value objects — cheap
//! to clone, cheap to hand to a hub, and the only shapes the rest of the core
//! needs to know about.

mod severity;

pub use severity::Severity;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminates which buffer/table/DLQ-kind a record belongs to. Mirrors the
/// three OTLP signal kinds the core ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Trace,
    Span,
    Log,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Trace => "trace",
            RecordKind::Span => "span",
            RecordKind::Log => "log",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome status of a trace or span, normalized from the OTLP `Status` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanStatus {
    Ok,
    Error,
    Unset,
}

impl Default for SpanStatus {
    fn default() -> Self {
        SpanStatus::Unset
    }
}

impl SpanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SpanStatus::Ok => "OK",
            SpanStatus::Error => "ERROR",
            SpanStatus::Unset => "UNSET",
        }
    }
}

/// A root-level trace record. Identity is `trace_id`; a second ingest of the
/// same `trace_id` is an idempotent append (later spans may still arrive), so
/// this struct only carries the fields known at the moment a root span was
/// seen plus whatever spans accompanied it in the same export call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub service_name: String,
    pub operation: String,
    pub status: SpanStatus,
    pub duration_us: i64,
    pub timestamp: DateTime<Utc>,
    pub spans: Vec<Span>,
}

/// A single span belonging to a trace. No foreign-key enforcement against
/// `Trace` — async ingestion may write spans before the trace root is fully
/// known, or a trace may never acquire a distinguished root at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub trace_id: String,
    pub service_name: String,
    pub operation_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_us: i64,
    pub attributes_json: String,
    pub status: SpanStatus,
}

/// A single log record. `id` is assigned by the store on insert, so ingest
/// always constructs a `Log` with `id == None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub id: Option<i64>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub severity: Severity,
    pub body: String,
    pub service_name: String,
    pub attributes_json: String,
    /// Populated, if at all, by the out-of-scope AI annotation collaborator.
    /// The core never writes to this field itself.
    pub ai_insight: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A same-kind collection of records in flight between the writer and the
/// store (or, on failure, the DLQ). Keeping one variant per kind rather than
/// `Vec<dyn Record>` means the insert/replay callbacks (§9) stay fully typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Batch {
    Traces(Vec<Trace>),
    Spans(Vec<Span>),
    Logs(Vec<Log>),
}

impl Batch {
    pub fn kind(&self) -> RecordKind {
        match self {
            Batch::Traces(_) => RecordKind::Trace,
            Batch::Spans(_) => RecordKind::Span,
            Batch::Logs(_) => RecordKind::Log,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Batch::Traces(v) => v.len(),
            Batch::Spans(v) => v.len(),
            Batch::Logs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_kind_display_matches_dlq_filenames() {
        assert_eq!(RecordKind::Trace.as_str(), "trace");
        assert_eq!(RecordKind::Span.as_str(), "span");
        assert_eq!(RecordKind::Log.as_str(), "log");
    }

    #[test]
    fn span_status_defaults_to_unset() {
        assert_eq!(SpanStatus::default(), SpanStatus::Unset);
    }
}
