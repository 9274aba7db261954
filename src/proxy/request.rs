// src/proxy/request.rs
use super::error::ProxyError;
use hyper::body::Bytes;
use hyper::header::{
    HeaderMap, HeaderName, CONNECTION, CONTENT_LENGTH, HOST, TE, TRAILER, TRANSFER_ENCODING,
    UPGRADE,
};
use hyper::http::request::Parts;
use hyper::Method;
use std::time::Duration;
use url::Url;

/// An outgoing request snapshot. The body is shared, never copied, between
/// the primary and every mirror built from the same inbound request.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl PendingRequest {
    pub fn into_request(self) -> reqwest::Request {
        let mut request = reqwest::Request::new(self.method, self.url);
        *request.headers_mut() = self.headers;
        *request.body_mut() = Some(reqwest::Body::from(self.body));
        *request.timeout_mut() = self.timeout;
        request
    }
}

/// Builds the primary request: inbound method, headers and body, with the
/// inbound path joined onto the target's path and host/scheme rewritten.
///
/// No timeout is set; the send lives as long as the inbound request does.
pub fn rebuild_primary(
    inbound: &Parts,
    body: Bytes,
    target: &Url,
) -> Result<PendingRequest, ProxyError> {
    check_scheme(target)?;

    let mut url = target.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.set_path(&join_path(target.path(), inbound.uri.path()));

    Ok(PendingRequest {
        method: inbound.method.clone(),
        url,
        headers: forwarded_headers(&inbound.headers),
        body,
        timeout: None,
    })
}

/// Builds a mirror request. Always a POST, bounded by `timeout` regardless of
/// the inbound request's lifetime.
pub fn build_mirror(
    body: Bytes,
    headers: &HeaderMap,
    endpoint_url: &str,
    timeout: Duration,
) -> Result<PendingRequest, ProxyError> {
    let url = Url::parse(endpoint_url).map_err(|source| ProxyError::InvalidUrl {
        url: endpoint_url.to_string(),
        source,
    })?;
    check_scheme(&url)?;

    Ok(PendingRequest {
        method: Method::POST,
        url,
        headers: headers.clone(),
        body,
        timeout: Some(timeout),
    })
}

fn check_scheme(url: &Url) -> Result<(), ProxyError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ProxyError::UnsupportedScheme(other.to_string())),
    }
}

/// Inbound headers minus hop-by-hop headers and those the client recomputes
/// for the buffered body.
pub fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();

    // Headers listed in Connection are hop-by-hop too.
    let listed: Vec<HeaderName> = inbound
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in [CONNECTION, HOST, CONTENT_LENGTH, TE, TRAILER, TRANSFER_ENCODING, UPGRADE] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
    headers
}

/// Joins two URL paths with clean-path semantics: empty and `.` segments
/// dropped, `..` resolved, always rooted, no trailing slash.
pub fn join_path(prefix: &str, path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in prefix.split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}
