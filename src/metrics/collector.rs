// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use reqwest::{Method, StatusCode};
use std::fmt;
use std::sync::Arc;

/// Label value for sends that never produced an HTTP status.
pub const ERROR_CODE: &str = "<error>";

/// Outcome class used as the `code` label of remote write counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Status(StatusCode),
    Error,
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Status(status) => write!(f, "{}", status.as_u16()),
            ResultCode::Error => f.write_str(ERROR_CODE),
        }
    }
}

/// Counters the proxy increments. Injected so tests can swap in a fake.
pub trait MetricsSink: Send + Sync {
    fn record_request(&self, method: &Method);

    fn record_remote_write(&self, code: ResultCode, endpoint: &str);
}

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    pub requests_total: IntCounterVec,
    pub remote_write_requests_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("http_proxy_requests_total", "Counter of proxy HTTP requests.")
                .const_label("proxy", "metricsv1-write"),
            &["method"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let remote_write_requests_total = IntCounterVec::new(
            Opts::new(
                "remote_write_requests_total",
                "Counter of remote write requests.",
            )
            .const_label("proxy", "metricsv1-remotewrite"),
            &["code", "name"],
        )?;
        registry.register(Box::new(remote_write_requests_total.clone()))?;

        Ok(Self {
            requests_total,
            remote_write_requests_total,
        })
    }

    pub fn remote_write_count(&self, code: &str, endpoint: &str) -> u64 {
        self.remote_write_requests_total
            .with_label_values(&[code, endpoint])
            .get()
    }
}

impl MetricsSink for MetricsCollector {
    fn record_request(&self, method: &Method) {
        self.requests_total
            .with_label_values(&[method.as_str()])
            .inc();
    }

    fn record_remote_write(&self, code: ResultCode, endpoint: &str) {
        let code = code.to_string();
        self.remote_write_requests_total
            .with_label_values(&[code.as_str(), endpoint])
            .inc();
    }
}
