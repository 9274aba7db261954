// src/proxy/mirror.rs
use super::client_pool::ClientPool;
use super::request::build_mirror;
use crate::config::Endpoint;
use crate::metrics::{Reporter, SendOutcome};
use hyper::body::Bytes;
use hyper::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::Instrument;

/// Everything a detached fan-out needs. Cheap to clone per request.
#[derive(Clone)]
pub struct MirrorFanout {
    pub(crate) endpoints: Arc<[Endpoint]>,
    pub(crate) clients: Arc<ClientPool>,
    pub(crate) reporter: Arc<Reporter>,
    pub(crate) in_flight: Arc<Semaphore>,
    pub(crate) timeout: Duration,
}

impl MirrorFanout {
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Runs the fan-out in the background, detached from the caller.
    pub fn spawn(&self, body: Bytes, headers: HeaderMap) {
        if self.endpoints.is_empty() {
            return;
        }
        let fanout = self.clone();
        tokio::spawn(fanout.run(body, headers).in_current_span());
    }

    /// Sends one copy of the request to every endpoint. Each send is its own
    /// task holding an in-flight permit. The mirror timeout covers both the
    /// wait for a permit and the send; a mirror that gets no permit in time
    /// is skipped.
    pub async fn run(self, body: Bytes, headers: HeaderMap) {
        let deadline = Instant::now() + self.timeout;

        for endpoint in self.endpoints.iter() {
            let mut request = match build_mirror(body.clone(), &headers, &endpoint.url, self.timeout) {
                Ok(request) => request,
                Err(e) => {
                    self.reporter
                        .skipped(
                            &endpoint.name,
                            &endpoint.url,
                            "failed to build the remote write request",
                            e,
                        )
                        .await;
                    continue;
                }
            };

            let permit = match timeout_at(deadline, self.in_flight.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(e)) => {
                    self.reporter
                        .skipped(&endpoint.name, &endpoint.url, "mirror limiter closed", e)
                        .await;
                    continue;
                }
                Err(_) => {
                    self.reporter
                        .skipped(
                            &endpoint.name,
                            &endpoint.url,
                            "dropped remote write request, too many mirror requests in flight",
                            format!("no capacity within {:?}", self.timeout),
                        )
                        .await;
                    continue;
                }
            };

            // The permit wait and the send share one deadline.
            request.timeout = Some(deadline.saturating_duration_since(Instant::now()));

            let client = self.clients.lookup(&endpoint.name);
            let reporter = self.reporter.clone();
            let name = endpoint.name.clone();

            tokio::spawn(
                async move {
                    let url = request.url.clone();
                    let result = client.execute(request.into_request()).await;
                    let outcome = SendOutcome::capture(name, url, result).await;
                    drop(permit);
                    reporter.report(outcome).await;
                }
                .in_current_span(),
            );
        }
    }
}
