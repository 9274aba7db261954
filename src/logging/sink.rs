// src/logging/sink.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tracing::{error, warn};

/// One failure record for a single endpoint.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub endpoint: String,
    pub summary: String,
    pub status: Option<StatusCode>,
    pub url: Option<String>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl LogMessage {
    pub fn new(endpoint: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            summary: summary.into(),
            status: None,
            url: None,
            response: None,
            error: None,
            observed_at: Utc::now(),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Destination for log messages drained by the [`LogManager`](super::LogManager).
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn emit(&self, message: LogMessage);
}

/// Emits each message as one structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl LogSink for TracingSink {
    async fn emit(&self, message: LogMessage) {
        let status = message.status.map(|s| s.as_u16());
        let observed_at = message.observed_at.to_rfc3339();

        if message.error.is_some() {
            error!(
                endpoint = %message.endpoint,
                status,
                url = message.url.as_deref(),
                response = message.response.as_deref(),
                err = message.error.as_deref(),
                observed_at = %observed_at,
                "{}",
                message.summary
            );
        } else {
            warn!(
                endpoint = %message.endpoint,
                status,
                url = message.url.as_deref(),
                response = message.response.as_deref(),
                observed_at = %observed_at,
                "{}",
                message.summary
            );
        }
    }
}
