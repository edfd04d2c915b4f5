pub mod http;
pub mod metrics;

pub use metrics::*;
