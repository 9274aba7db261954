//! demos/test_backend.rs
//! Fake remote write target for trying the proxy by hand.
//! Run: cargo run --example test_backend -- <port> [name]
//!
//! STATUS (default 204), BASE_DELAY_MS, JITTER_MS and FAIL_PCT tune replies.

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use rand::Rng;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

#[derive(Clone)]
struct BackendState {
    name:        String,
    req_counter: Arc<AtomicU64>,
    status:      StatusCode,
    base_delay:  u64,
    jitter_ms:   u64,
    fail_pct:    f64,
}

// ——————————————————————————————————————————
// Request handler
async fn handle(
    req: Request<Body>,
    state: BackendState,
) -> Result<Response<Body>, hyper::Error> {
    let n = state.req_counter.fetch_add(1, Ordering::SeqCst) + 1;
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let body = hyper::body::to_bytes(req.into_body()).await?;

    let delay =
        state.base_delay + rand::thread_rng().gen_range(0..=state.jitter_ms);
    if delay > 0 {
        sleep(Duration::from_millis(delay)).await;
    }

    let status = if state.fail_pct > 0.0
        && rand::thread_rng().gen_bool((state.fail_pct / 100.0).min(1.0))
    {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        state.status
    };

    println!(
        "[{}] #{} {} {} {} bytes -> {} ({}ms)",
        state.name,
        n,
        method,
        path,
        body.len(),
        status.as_u16(),
        delay
    );

    let mut response = Response::new(Body::from(format!("{} says {}", state.name, status)));
    *response.status_mut() = status;
    Ok(response)
}

// ——————————————————————————————————————————
// Main
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "19291".into())
        .parse()?;
    let name = std::env::args()
        .nth(2)
        .or_else(|| std::env::var("BACKEND_NAME").ok())
        .unwrap_or_else(|| format!("receiver-{port}"));

    let status: u16 =
        std::env::var("STATUS").ok().and_then(|v| v.parse().ok()).unwrap_or(204);
    let base_delay =
        std::env::var("BASE_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(0);
    let jitter_ms =
        std::env::var("JITTER_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(0);
    let fail_pct =
        std::env::var("FAIL_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.0);

    let state = BackendState {
        name: name.clone(),
        req_counter: Arc::new(AtomicU64::new(0)),
        status: StatusCode::from_u16(status)?,
        base_delay,
        jitter_ms,
        fail_pct,
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let make_svc = make_service_fn(move |_conn| {
        let st = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle(req, st.clone())
            }))
        }
    });

    println!(
        "Fake receiver '{}' on http://{}  [status={} delay={}ms±{} fail={} %]",
        name, addr, status, base_delay, jitter_ms, fail_pct
    );

    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
