//! Library surface for the `argus` ingest core. Split out from `main.rs` so
//! the benchmark target (and any future integration tests) can exercise the
//! pipeline's pure functions without linking the binary.

pub mod cli;
pub mod config;
pub mod dlq;
pub mod filter;
pub mod grpc;
pub mod helpers;
pub mod hub;
pub mod instrumentation;
pub mod metrics;
pub mod model;
pub mod otlp;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod writer;
