// src/proxy/error.rs
use hyper::{Body, Response, StatusCode};

/// Failures that stop a request before it is sent.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to read request body: {0}")]
    ReadBody(#[source] hyper::Error),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported url scheme {0:?}")]
    UnsupportedScheme(String),
}

// Every ingress failure is a bare 500 to the caller.
impl From<ProxyError> for Response<Body> {
    fn from(_: ProxyError) -> Self {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    }
}
