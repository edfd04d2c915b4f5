//! Normalization from OTLP wire types to the core's own [`crate::model`]
//! types (§4.2). Pure conversion code: no I/O, no channels, nothing async —
//! easy to unit test in isolation from the gRPC transport that calls it.

use argus_proto::common::{AnyValue, KeyValue, any_value::Value};
use argus_proto::resource::Resource;
use argus_proto::trace::Span as ProtoSpan;
use argus_proto::trace::status::StatusCode as ProtoStatusCode;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value as JsonValue};

use crate::model::{Log, Severity, Span, SpanStatus, Trace};

/// `service.name` resource attribute key, per OTLP semantic conventions.
const SERVICE_NAME_KEY: &str = "service.name";

/// Fallback service name when a resource carries no `service.name`
/// attribute (§4.2).
pub const UNKNOWN_SERVICE: &str = "unknown_service";

/// Converts OTLP unix-nanos to a UTC instant. Out-of-range values (larger
/// than `i64::MAX` nanoseconds, effectively the year 2262) fall back to the
/// Unix epoch rather than panicking — a malformed timestamp should never
/// crash ingest.
pub fn unix_nanos_to_utc(nanos: u64) -> DateTime<Utc> {
    let secs = (nanos / 1_000_000_000) as i64;
    let subsec_nanos = (nanos % 1_000_000_000) as u32;
    Utc.timestamp_opt(secs, subsec_nanos).single().unwrap_or_else(|| Utc.timestamp_nanos(0))
}

/// Hex-encodes a trace/span id. Empty ids (the zero-length OTLP default)
/// encode to an empty string rather than panicking.
pub fn id_to_hex(id: &[u8]) -> String {
    hex::encode(id)
}

/// Extracts `service.name` from a resource's attributes, defaulting to
/// [`UNKNOWN_SERVICE`] when absent or not a string (§4.2).
pub fn extract_service_name(resource: Option<&Resource>) -> String {
    resource
        .and_then(|r| r.attributes.iter().find(|kv| kv.key == SERVICE_NAME_KEY))
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| match &v.value {
            Some(Value::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

/// Flattens a list of OTLP `KeyValue` attributes into a stable JSON object:
/// keys sorted, `AnyValue` oneofs flattened to native JSON types (§4.2).
pub fn attributes_to_json(attrs: &[KeyValue]) -> String {
    let mut map = Map::new();
    for kv in attrs {
        if let Some(value) = &kv.value {
            map.insert(kv.key.clone(), any_value_to_json(value));
        }
    }
    map.sort_keys();
    JsonValue::Object(map).to_string()
}

fn any_value_to_json(value: &AnyValue) -> JsonValue {
    match &value.value {
        Some(Value::StringValue(s)) => JsonValue::String(s.clone()),
        Some(Value::BoolValue(b)) => JsonValue::Bool(*b),
        Some(Value::IntValue(i)) => JsonValue::Number((*i).into()),
        Some(Value::DoubleValue(d)) => {
            serde_json::Number::from_f64(*d).map(JsonValue::Number).unwrap_or(JsonValue::Null)
        }
        Some(Value::BytesValue(b)) => JsonValue::String(hex::encode(b)),
        Some(Value::ArrayValue(arr)) => {
            JsonValue::Array(arr.values.iter().map(any_value_to_json).collect())
        }
        Some(Value::KvlistValue(list)) => {
            let mut map = Map::new();
            for kv in &list.values {
                if let Some(v) = &kv.value {
                    map.insert(kv.key.clone(), any_value_to_json(v));
                }
            }
            map.sort_keys();
            JsonValue::Object(map)
        }
        None => JsonValue::Null,
    }
}

fn proto_status_to_span_status(status: Option<&argus_proto::trace::Status>) -> SpanStatus {
    match status.map(|s| s.code()) {
        Some(ProtoStatusCode::Ok) => SpanStatus::Ok,
        Some(ProtoStatusCode::Error) => SpanStatus::Error,
        _ => SpanStatus::Unset,
    }
}

/// One span, normalized. The companion `Trace` record (present only when
/// `span` is a root span, i.e. carries no `parent_span_id`) is derived at
/// the same time since both need the same decoded fields.
pub struct NormalizedSpan {
    pub span: Span,
    pub trace: Option<Trace>,
}

/// Normalizes a single OTLP span into the core's `Span` (and, for root
/// spans, a companion `Trace`) record.
pub fn normalize_span(proto: &ProtoSpan, service_name: &str) -> NormalizedSpan {
    let trace_id = id_to_hex(&proto.trace_id);
    let span_id = id_to_hex(&proto.span_id);
    let parent_span_id = id_to_hex(&proto.parent_span_id);
    let parent_span_id = if parent_span_id.is_empty() { None } else { Some(parent_span_id) };
    let start_time = unix_nanos_to_utc(proto.start_time_unix_nano);
    let end_time = unix_nanos_to_utc(proto.end_time_unix_nano);
    let duration_us = end_time
        .signed_duration_since(start_time)
        .num_microseconds()
        .unwrap_or(0)
        .max(0);
    let status = proto_status_to_span_status(proto.status.as_ref());
    let attributes_json = attributes_to_json(&proto.attributes);

    let span = Span {
        span_id: span_id.clone(),
        parent_span_id: parent_span_id.clone(),
        trace_id: trace_id.clone(),
        service_name: service_name.to_string(),
        operation_name: proto.name.clone(),
        start_time,
        end_time,
        duration_us,
        attributes_json,
        status,
    };

    let trace = if parent_span_id.is_none() {
        Some(Trace {
            trace_id,
            service_name: service_name.to_string(),
            operation: proto.name.clone(),
            status,
            duration_us,
            timestamp: start_time,
            spans: Vec::new(),
        })
    } else {
        None
    };

    NormalizedSpan { span, trace }
}

/// Normalizes a single OTLP log record into the core's `Log` record.
pub fn normalize_log(proto: &argus_proto::logs::LogRecord, service_name: &str) -> Log {
    let trace_id = id_to_hex(&proto.trace_id);
    let trace_id = if trace_id.is_empty() { None } else { Some(trace_id) };
    let span_id = id_to_hex(&proto.span_id);
    let span_id = if span_id.is_empty() { None } else { Some(span_id) };

    let severity = if !proto.severity_text.is_empty() {
        Severity::normalize(&proto.severity_text)
    } else {
        Severity::from_otlp_number(proto.severity_number)
    };

    let body = proto
        .body
        .as_ref()
        .map(|v| match &v.value {
            Some(Value::StringValue(s)) => s.clone(),
            _ => any_value_to_json(v).to_string(),
        })
        .unwrap_or_default();

    let timestamp = unix_nanos_to_utc(if proto.time_unix_nano != 0 {
        proto.time_unix_nano
    } else {
        proto.observed_time_unix_nano
    });

    Log {
        id: None,
        trace_id,
        span_id,
        severity,
        body,
        service_name: service_name.to_string(),
        attributes_json: attributes_to_json(&proto.attributes),
        ai_insight: None,
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_proto::common::AnyValue;
    use argus_proto::common::any_value::Value as AV;

    fn kv(key: &str, value: AV) -> KeyValue {
        KeyValue { key: key.to_string(), value: Some(AnyValue { value: Some(value) }) }
    }

    #[test]
    fn service_name_falls_back_when_absent() {
        assert_eq!(extract_service_name(None), UNKNOWN_SERVICE);
        let resource = Resource { attributes: vec![], dropped_attributes_count: 0 };
        assert_eq!(extract_service_name(Some(&resource)), UNKNOWN_SERVICE);
    }

    #[test]
    fn service_name_extracted_from_attributes() {
        let resource = Resource {
            attributes: vec![kv("service.name", AV::StringValue("checkout".to_string()))],
            dropped_attributes_count: 0,
        };
        assert_eq!(extract_service_name(Some(&resource)), "checkout");
    }

    #[test]
    fn attributes_json_sorts_keys_and_flattens_scalars() {
        let attrs = vec![
            kv("zeta", AV::BoolValue(true)),
            kv("alpha", AV::StringValue("x".to_string())),
            kv("count", AV::IntValue(3)),
        ];
        let json = attributes_to_json(&attrs);
        assert_eq!(json, r#"{"alpha":"x","count":3,"zeta":true}"#);
    }

    #[test]
    fn root_span_produces_companion_trace() {
        let proto = ProtoSpan {
            trace_id: vec![0xab; 16],
            span_id: vec![0xcd; 8],
            parent_span_id: Vec::new(),
            name: "checkout".to_string(),
            start_time_unix_nano: 1_000_000_000,
            end_time_unix_nano: 1_500_000_000,
            ..Default::default()
        };
        let normalized = normalize_span(&proto, "orders");
        assert!(normalized.trace.is_some());
        let trace = normalized.trace.unwrap();
        assert_eq!(trace.duration_us, 500_000);
        assert_eq!(trace.trace_id, normalized.span.trace_id);
    }

    #[test]
    fn child_span_produces_no_trace() {
        let proto = ProtoSpan {
            trace_id: vec![0xab; 16],
            span_id: vec![0xcd; 8],
            parent_span_id: vec![0xef; 8],
            name: "db.query".to_string(),
            ..Default::default()
        };
        let normalized = normalize_span(&proto, "orders");
        assert!(normalized.trace.is_none());
        assert_eq!(normalized.span.parent_span_id, Some(id_to_hex(&[0xef; 8])));
    }

    #[test]
    fn log_severity_prefers_text_over_number() {
        let proto = argus_proto::logs::LogRecord {
            severity_text: "warn".to_string(),
            severity_number: 17, // would be ERROR if consulted
            ..Default::default()
        };
        let log = normalize_log(&proto, "orders");
        assert_eq!(log.severity, Severity::Warn);
    }

    #[test]
    fn log_falls_back_to_severity_number_when_text_absent() {
        let proto = argus_proto::logs::LogRecord { severity_number: 17, ..Default::default() };
        let log = normalize_log(&proto, "orders");
        assert_eq!(log.severity, Severity::Error);
    }
}
