// src/config/models.rs
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Name used for the primary upstream in metrics labels and log channels.
pub const DEFAULT_PRIMARY_NAME: &str = "thanos-receiver";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default)]
    pub metrics: MetricsConfig,

    pub proxy: ProxyConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.proxy.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub primary: PrimaryConfig,

    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    #[serde(default)]
    pub mirror: MirrorConfig,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl ProxyConfig {
    /// Config with defaults for everything except the primary target.
    pub fn new(primary_url: impl Into<String>) -> Self {
        Self {
            primary: PrimaryConfig {
                url: primary_url.into(),
                name: default_primary_name(),
            },
            endpoints: Vec::new(),
            mirror: MirrorConfig::default(),
            max_body_bytes: default_max_body_bytes(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.primary.target_url()?;

        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                bail!("endpoint with url {:?} has an empty name", endpoint.url);
            }
            if endpoint.name == self.primary.name {
                bail!(
                    "endpoint name {:?} collides with the primary endpoint name",
                    endpoint.name
                );
            }
            if !names.insert(endpoint.name.as_str()) {
                bail!("duplicate endpoint name {:?}", endpoint.name);
            }
            // Bad mirror URLs only affect that mirror, at request time.
            if let Err(e) = Url::parse(&endpoint.url) {
                tracing::warn!(
                    endpoint = %endpoint.name,
                    url = %endpoint.url,
                    "mirror url does not parse, requests to it will be skipped: {}",
                    e
                );
            }
        }

        if self.mirror.timeout_ms == 0 {
            bail!("mirror.timeout_ms must be greater than zero");
        }
        if self.mirror.max_in_flight == 0 {
            bail!("mirror.max_in_flight must be greater than zero");
        }
        if self.mirror.log_buffer == 0 {
            bail!("mirror.log_buffer must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrimaryConfig {
    pub url: String,

    #[serde(default = "default_primary_name")]
    pub name: String,
}

impl PrimaryConfig {
    /// Parses the primary URL, treating a scheme-less value as `http://`.
    pub fn target_url(&self) -> Result<Url> {
        let raw = self.url.trim();
        let url = if raw.contains("://") {
            Url::parse(raw)
        } else {
            Url::parse(&format!("http://{raw}"))
        }
        .with_context(|| format!("invalid primary url {:?}", self.url))?;

        match url.scheme() {
            "http" | "https" => {}
            other => bail!("unsupported primary url scheme {:?}", other),
        }
        if url.host_str().is_none() {
            bail!("primary url {:?} has no host", self.url);
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    #[serde(default = "default_mirror_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_log_buffer")]
    pub log_buffer: usize,
}

impl MirrorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_mirror_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            log_buffer: default_log_buffer(),
        }
    }
}

/// A secondary write target that receives a copy of every request.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,

    #[serde(default, rename = "http_client_config")]
    pub client_config: Option<ClientConfig>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client_config: None,
        }
    }

    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = Some(config);
        self
    }
}

/// Per-endpoint transport settings, using Prometheus' client config field names.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub bearer_token: Option<String>,

    #[serde(default)]
    pub bearer_token_file: Option<PathBuf>,

    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,

    #[serde(default)]
    pub tls_config: Option<TlsConfig>,

    #[serde(default)]
    pub proxy_url: Option<String>,

    #[serde(default = "default_true")]
    pub follow_redirects: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bearer_token: None,
            bearer_token_file: None,
            basic_auth: None,
            tls_config: None,
            proxy_url: None,
            follow_redirects: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicAuth {
    pub username: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    #[serde(default)]
    pub key_file: Option<PathBuf>,

    #[serde(default)]
    pub insecure_skip_verify: bool,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_primary_name() -> String {
    DEFAULT_PRIMARY_NAME.to_string()
}

fn default_mirror_timeout_ms() -> u64 {
    5_000
}

fn default_max_in_flight() -> usize {
    1024
}

fn default_log_buffer() -> usize {
    256
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}
