// src/metrics/reporter.rs
use super::collector::{MetricsSink, ResultCode};
use crate::logging::{LogManager, LogMessage};
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Upper bound on how much of a failed response body ends up in a log message.
pub const MAX_RESPONSE_SNIPPET: usize = 4096;

/// Result of one outbound send, consumed by [`Reporter::report`].
#[derive(Debug)]
pub struct SendOutcome {
    pub endpoint: String,
    pub url: Url,
    pub delivery: Delivery,
}

#[derive(Debug)]
pub enum Delivery {
    Status {
        status: StatusCode,
        /// Captured only for non-2xx responses.
        response: Option<ResponseSnippet>,
    },
    Transport(String),
}

#[derive(Debug, Default)]
pub struct ResponseSnippet {
    pub body: String,
    pub read_error: Option<String>,
}

impl SendOutcome {
    /// Classifies a send result, draining the body of non-2xx responses.
    pub async fn capture(
        endpoint: impl Into<String>,
        url: Url,
        result: Result<reqwest::Response, reqwest::Error>,
    ) -> Self {
        let delivery = match result {
            Err(e) => Delivery::Transport(e.to_string()),
            Ok(response) => {
                let status = response.status();
                let response = if status.is_success() {
                    None
                } else {
                    Some(read_snippet(response).await)
                };
                Delivery::Status { status, response }
            }
        };

        Self {
            endpoint: endpoint.into(),
            url,
            delivery,
        }
    }

    pub fn code(&self) -> ResultCode {
        match &self.delivery {
            Delivery::Status { status, .. } => ResultCode::Status(*status),
            Delivery::Transport(_) => ResultCode::Error,
        }
    }

}

/// Status the caller sees for a primary send. Available as soon as the
/// response head arrives; the body is left for [`SendOutcome::capture`].
pub fn caller_status(result: &Result<reqwest::Response, reqwest::Error>) -> StatusCode {
    match result {
        Ok(response) => response.status(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Reads at most [`MAX_RESPONSE_SNIPPET`] bytes; the rest of the body is
/// never pulled off the connection.
async fn read_snippet(mut response: reqwest::Response) -> ResponseSnippet {
    let mut body = Vec::new();
    let mut read_error = None;

    while body.len() < MAX_RESPONSE_SNIPPET {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(MAX_RESPONSE_SNIPPET - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                read_error = Some(e.to_string());
                break;
            }
        }
    }

    ResponseSnippet {
        body: String::from_utf8_lossy(&body).into_owned(),
        read_error,
    }
}

/// The only writer of remote write counters; forwards failures to the log manager.
pub struct Reporter {
    metrics: Arc<dyn MetricsSink>,
    logs: Arc<LogManager>,
}

impl Reporter {
    pub fn new(metrics: Arc<dyn MetricsSink>, logs: Arc<LogManager>) -> Self {
        Self { metrics, logs }
    }

    pub fn logs(&self) -> &Arc<LogManager> {
        &self.logs
    }

    pub async fn report(&self, outcome: SendOutcome) {
        self.metrics
            .record_remote_write(outcome.code(), &outcome.endpoint);

        match outcome.delivery {
            Delivery::Transport(err) => {
                self.logs
                    .log(
                        LogMessage::new(&outcome.endpoint, "failed to send request to the server")
                            .url(outcome.url.as_str())
                            .error(err),
                    )
                    .await;
            }
            Delivery::Status { status, response: Some(snippet) } => {
                let mut message = LogMessage::new(
                    &outcome.endpoint,
                    format!("failed to forward metrics {status}"),
                )
                .status(status)
                .url(outcome.url.as_str())
                .response(snippet.body);
                if let Some(err) = snippet.read_error {
                    message = message.error(err);
                }
                self.logs.log(message).await;
            }
            Delivery::Status { status, response: None } => {
                debug!(
                    endpoint = %outcome.endpoint,
                    url = %outcome.url,
                    status = status.as_u16(),
                    "Successfully forwarded metrics"
                );
            }
        }
    }

    /// Counts and logs a mirror that was never sent.
    pub async fn skipped(&self, endpoint: &str, url: &str, summary: &str, err: impl ToString) {
        self.metrics.record_remote_write(ResultCode::Error, endpoint);
        self.logs
            .log(LogMessage::new(endpoint, summary).url(url).error(err))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogSink;
    use async_trait::async_trait;
    use hyper::body::Bytes;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Response, Server};
    use reqwest::Method;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::time::Instant;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeMetrics {
        counts: Mutex<HashMap<(String, String), u64>>,
    }

    impl FakeMetrics {
        fn count(&self, code: &str, endpoint: &str) -> u64 {
            let key = (code.to_string(), endpoint.to_string());
            self.counts.lock().unwrap().get(&key).copied().unwrap_or(0)
        }
    }

    impl MetricsSink for FakeMetrics {
        fn record_request(&self, _method: &Method) {}

        fn record_remote_write(&self, code: ResultCode, endpoint: &str) {
            *self
                .counts
                .lock()
                .unwrap()
                .entry((code.to_string(), endpoint.to_string()))
                .or_default() += 1;
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<LogMessage>>);

    #[async_trait]
    impl LogSink for Collect {
        async fn emit(&self, message: LogMessage) {
            self.0.lock().unwrap().push(message);
        }
    }

    async fn drained(sink: &Collect, count: usize) -> Vec<LogMessage> {
        for _ in 0..200 {
            if sink.0.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sink.0.lock().unwrap().clone()
    }

    fn url() -> Url {
        Url::parse("http://mirror.local/api/v1/write").unwrap()
    }

    fn reporter(metrics: Arc<FakeMetrics>, sink: Arc<Collect>) -> Reporter {
        let logs = Arc::new(LogManager::new(["mirror"], sink, 8));
        Reporter::new(metrics, logs)
    }

    #[tokio::test]
    async fn success_counts_without_logging() {
        let metrics = Arc::new(FakeMetrics::default());
        let sink = Arc::new(Collect::default());
        let reporter = reporter(metrics.clone(), sink.clone());

        let outcome = SendOutcome {
            endpoint: "mirror".into(),
            url: url(),
            delivery: Delivery::Status {
                status: StatusCode::NO_CONTENT,
                response: None,
            },
        };
        reporter.report(outcome).await;

        assert_eq!(metrics.count("204", "mirror"), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_logged_with_response() {
        let metrics = Arc::new(FakeMetrics::default());
        let sink = Arc::new(Collect::default());
        let reporter = reporter(metrics.clone(), sink.clone());

        reporter
            .report(SendOutcome {
                endpoint: "mirror".into(),
                url: url(),
                delivery: Delivery::Status {
                    status: StatusCode::FORBIDDEN,
                    response: Some(ResponseSnippet {
                        body: "tenant denied".into(),
                        read_error: None,
                    }),
                },
            })
            .await;

        assert_eq!(metrics.count("403", "mirror"), 1);
        let logged = drained(&sink, 1).await;
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].status, Some(StatusCode::FORBIDDEN));
        assert_eq!(logged[0].response.as_deref(), Some("tenant denied"));
        assert!(logged[0].summary.contains("403"));
        assert!(logged[0].error.is_none());
    }

    #[tokio::test]
    async fn transport_error_uses_error_sentinel() {
        let metrics = Arc::new(FakeMetrics::default());
        let sink = Arc::new(Collect::default());
        let reporter = reporter(metrics.clone(), sink.clone());

        let outcome = SendOutcome {
            endpoint: "mirror".into(),
            url: url(),
            delivery: Delivery::Transport("connection refused".into()),
        };
        reporter.report(outcome).await;

        assert_eq!(metrics.count("<error>", "mirror"), 1);
        let logged = drained(&sink, 1).await;
        assert_eq!(logged[0].error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn capture_reads_body_of_failed_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let target = Url::parse(&format!("{}/write", server.url())).unwrap();
        let result = reqwest::Client::new().post(target.clone()).send().await;
        let outcome = SendOutcome::capture("mirror", target, result).await;

        mock.assert_async().await;
        match outcome.delivery {
            Delivery::Status { status, response: Some(snippet) } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(snippet.body, "overloaded");
            }
            other => panic!("unexpected delivery {other:?}"),
        }
    }

    /// Replies 503 with one snippet-sized chunk, then stalls before sending
    /// `rest` more chunks.
    async fn stalling_upstream(stall: Duration, rest: usize) -> SocketAddr {
        let make_svc = make_service_fn(move |_conn| async move {
            Ok::<_, Infallible>(service_fn(move |_req: hyper::Request<Body>| async move {
                let (mut sender, body) = Body::channel();
                tokio::spawn(async move {
                    let chunk = Bytes::from(vec![b'x'; MAX_RESPONSE_SNIPPET]);
                    if sender.send_data(chunk.clone()).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(stall).await;
                    for _ in 0..rest {
                        if sender.send_data(chunk.clone()).await.is_err() {
                            return;
                        }
                    }
                });

                let mut response = Response::new(body);
                *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                Ok::<_, Infallible>(response)
            }))
        });

        let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    }

    #[tokio::test]
    async fn capture_stops_reading_at_the_snippet_limit() {
        let addr = stalling_upstream(Duration::from_secs(5), 16).await;
        let target = Url::parse(&format!("http://{addr}/write")).unwrap();

        let started = Instant::now();
        let result = reqwest::Client::new().post(target.clone()).send().await;
        assert_eq!(caller_status(&result), StatusCode::SERVICE_UNAVAILABLE);
        let outcome = SendOutcome::capture("mirror", target, result).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        match outcome.delivery {
            Delivery::Status { response: Some(snippet), .. } => {
                assert_eq!(snippet.body.len(), MAX_RESPONSE_SNIPPET);
                assert!(snippet.read_error.is_none());
            }
            other => panic!("unexpected delivery {other:?}"),
        }
    }

    #[tokio::test]
    async fn caller_status_of_a_transport_error_is_500() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = reqwest::Client::new()
            .post(format!("http://{addr}/write"))
            .send()
            .await;
        assert_eq!(caller_status(&result), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
