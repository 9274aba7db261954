// ────────────────────────────────
// src/proxy/proxy.rs
// Forwards each write to the primary and mirrors a copy to every endpoint
// ────────────────────────────────

use super::client_pool::ClientPool;
use super::error::ProxyError;
use super::mirror::MirrorFanout;
use super::request::{forwarded_headers, rebuild_primary};
use crate::config::ProxyConfig;
use crate::logging::{LogManager, LogSink};
use crate::metrics::{caller_status, MetricsSink, Reporter, SendOutcome};
use anyhow::Result;
use hyper::body::{Bytes, HttpBody};
use hyper::{Body, Request, Response};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, Instrument};
use url::Url;
use uuid::Uuid;

pub struct Proxy {
    target: Url,
    primary_name: String,
    max_body_bytes: usize,
    clients: Arc<ClientPool>,
    reporter: Arc<Reporter>,
    metrics: Arc<dyn MetricsSink>,
    mirrors: MirrorFanout,
}

impl Proxy {
    /// Builds the client pool and starts one log consumer per endpoint,
    /// primary included. Must run inside a Tokio runtime.
    pub fn new(
        config: &ProxyConfig,
        metrics: Arc<dyn MetricsSink>,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        config.validate()?;
        let target = config.primary.target_url()?;

        let names = std::iter::once(config.primary.name.clone())
            .chain(config.endpoints.iter().map(|e| e.name.clone()));
        let logs = Arc::new(LogManager::new(names, sink, config.mirror.log_buffer));
        let reporter = Arc::new(Reporter::new(metrics.clone(), logs));
        let clients = Arc::new(ClientPool::new(&config.endpoints));

        let mirrors = MirrorFanout {
            endpoints: config.endpoints.clone().into(),
            clients: clients.clone(),
            reporter: reporter.clone(),
            in_flight: Arc::new(Semaphore::new(config.mirror.max_in_flight)),
            timeout: config.mirror.timeout(),
        };

        info!(
            primary = %target,
            mirrors = config.endpoints.len(),
            "remote write proxy configured"
        );

        Ok(Self {
            target,
            primary_name: config.primary.name.clone(),
            max_body_bytes: config.max_body_bytes,
            clients,
            reporter,
            metrics,
            mirrors,
        })
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        self.reporter.logs()
    }

    pub fn endpoint_count(&self) -> usize {
        self.mirrors.endpoints().len()
    }

    /// Handles one inbound write. The response carries only the primary's
    /// status; mirrors and failure reporting keep running after this returns.
    ///
    /// Dropping the returned future (caller disconnect) cancels the primary
    /// send but never the mirrors.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let span = tracing::info_span!("request", id = %Uuid::new_v4());
        self.forward(req).instrument(span).await
    }

    async fn forward(&self, req: Request<Body>) -> Response<Body> {
        self.metrics.record_request(req.method());

        let (parts, body) = req.into_parts();
        let body = match read_body(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(e) => {
                error!("failed to read request body: {}", e);
                return e.into();
            }
        };

        let primary = match rebuild_primary(&parts, body.clone(), &self.target) {
            Ok(request) => request,
            Err(e) => {
                error!("failed to rebuild the request: {}", e);
                return e.into();
            }
        };

        self.mirrors.spawn(body, forwarded_headers(&parts.headers));

        let url = primary.url.clone();
        let result = self
            .clients
            .default_client()
            .execute(primary.into_request())
            .await;
        let status = caller_status(&result);

        // The response never waits on body capture or the log channel.
        let reporter = self.reporter.clone();
        let name = self.primary_name.clone();
        tokio::spawn(
            async move {
                let outcome = SendOutcome::capture(name, url, result).await;
                reporter.report(outcome).await;
            }
            .in_current_span(),
        );

        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        response
    }
}

/// Buffers the whole body once, failing as soon as it passes `limit`.
async fn read_body(mut body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(ProxyError::ReadBody)?;
        if buf.len() + chunk.len() > limit {
            return Err(ProxyError::BodyTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}
