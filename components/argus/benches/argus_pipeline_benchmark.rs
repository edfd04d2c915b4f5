// Hot-path microbenchmarks for the ingest pipeline's pure, synchronous
// stages: attribute flattening, span/log normalization, and filter
// evaluation. None of these touch the network, the writer channel, or the
// store — the async plumbing around them is exercised by the integration
// tests instead.

use argus::filter::{self, FilterConfig};
use argus::model::Severity;
use argus::otlp;
use argus_proto::common::any_value::Value as AV;
use argus_proto::common::{AnyValue, KeyValue};
use argus_proto::logs::LogRecord;
use argus_proto::trace::Span as ProtoSpan;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn kv(key: &str, value: AV) -> KeyValue {
    KeyValue { key: key.to_string(), value: Some(AnyValue { value: Some(value) }) }
}

fn sample_attributes(n: usize) -> Vec<KeyValue> {
    (0..n)
        .map(|i| kv(&format!("attr.{i}"), AV::StringValue(format!("value-{i}"))))
        .collect()
}

fn bench_attributes_to_json(c: &mut Criterion) {
    let attrs = sample_attributes(16);
    c.bench_function("attributes_to_json_16", |b| {
        b.iter(|| black_box(otlp::attributes_to_json(black_box(&attrs))));
    });
}

fn bench_normalize_span(c: &mut Criterion) {
    let proto = ProtoSpan {
        trace_id: vec![0xab; 16],
        span_id: vec![0xcd; 8],
        parent_span_id: vec![0xef; 8],
        name: "db.query".to_string(),
        start_time_unix_nano: 1_000_000_000,
        end_time_unix_nano: 1_500_000_000,
        attributes: sample_attributes(8),
        ..Default::default()
    };
    c.bench_function("normalize_span", |b| {
        b.iter(|| black_box(otlp::normalize_span(black_box(&proto), black_box("orders"))));
    });
}

fn bench_normalize_log(c: &mut Criterion) {
    let proto = LogRecord {
        trace_id: vec![0xab; 16],
        span_id: vec![0xcd; 8],
        severity_text: "warn".to_string(),
        time_unix_nano: 1_000_000_000,
        attributes: sample_attributes(8),
        ..Default::default()
    };
    c.bench_function("normalize_log", |b| {
        b.iter(|| black_box(otlp::normalize_log(black_box(&proto), black_box("orders"))));
    });
}

fn bench_filter_evaluate(c: &mut Criterion) {
    let config = FilterConfig {
        min_severity: Severity::Info,
        allowed_services: Default::default(),
        excluded_services: Default::default(),
    };
    c.bench_function("filter_evaluate_admit", |b| {
        b.iter(|| {
            black_box(filter::evaluate(
                black_box(&config),
                black_box("orders"),
                black_box(Some(Severity::Warn)),
            ))
        });
    });
}

criterion_group!(
    benches,
    bench_attributes_to_json,
    bench_normalize_span,
    bench_normalize_log,
    bench_filter_evaluate
);
criterion_main!(benches);
