// src/metrics/mod.rs
mod collector;
mod reporter;

pub use collector::{MetricsCollector, MetricsRegistry, MetricsSink, ResultCode, ERROR_CODE};
pub use reporter::{
    caller_status, Delivery, Reporter, ResponseSnippet, SendOutcome, MAX_RESPONSE_SNIPPET,
};
