//! Generated OTLP protobuf/gRPC bindings consumed by the `argus` ingest core.
//!
//! Kept as its own crate so `build.rs`'s protoc invocation, and the generated
//! code it produces, never touch the core's own compile graph.

pub mod common {
    tonic::include_proto!("opentelemetry.proto.common.v1");
}

pub mod resource {
    tonic::include_proto!("opentelemetry.proto.resource.v1");
}

pub mod trace {
    tonic::include_proto!("opentelemetry.proto.trace.v1");
}

pub mod logs {
    tonic::include_proto!("opentelemetry.proto.logs.v1");
}

pub mod collector {
    pub mod trace {
        tonic::include_proto!("opentelemetry.proto.collector.trace.v1");
    }
    pub mod logs {
        tonic::include_proto!("opentelemetry.proto.collector.logs.v1");
    }
}
