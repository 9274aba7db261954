// src/proxy/mod.rs
mod client_pool;
mod error;
mod mirror;
mod proxy;
mod request;

pub use crate::config::Endpoint;
pub use client_pool::{default_client, ClientPool};
pub use error::ProxyError;
pub use mirror::MirrorFanout;
pub use proxy::Proxy;
pub use request::{build_mirror, forwarded_headers, join_path, rebuild_primary, PendingRequest};
