// src/proxy/client_pool.rs
use crate::config::{ClientConfig, Endpoint};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Certificate, Client, Identity};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Conservative client for the primary and for endpoints without their own
/// settings: no pooled keep-alive connections, so rarely used mirror
/// targets do not accumulate idle sockets.
pub fn default_client() -> Client {
    Client::builder()
        .pool_max_idle_per_host(0)
        .pool_idle_timeout(IDLE_TIMEOUT)
        .connect_timeout(DIAL_TIMEOUT)
        .tcp_keepalive(KEEP_ALIVE)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Outbound clients keyed by endpoint name. Built once, read-only afterwards.
#[derive(Clone)]
pub struct ClientPool {
    default: Client,
    clients: HashMap<String, Client>,
}

impl ClientPool {
    /// Builds a dedicated client for every endpoint with client settings.
    /// An endpoint whose settings fail to build falls back to the default.
    pub fn new(endpoints: &[Endpoint]) -> Self {
        let default = default_client();
        let mut clients = HashMap::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let client = match &endpoint.client_config {
                Some(config) => build_client(config).unwrap_or_else(|e| {
                    warn!(
                        endpoint = %endpoint.name,
                        "invalid http client config, using default client: {:#}",
                        e
                    );
                    default.clone()
                }),
                None => default.clone(),
            };
            clients.insert(endpoint.name.clone(), client);
        }

        Self { default, clients }
    }

    pub fn default_client(&self) -> &Client {
        &self.default
    }

    /// Never fails: unknown names get a freshly built default client.
    pub fn lookup(&self, name: &str) -> Client {
        match self.clients.get(name) {
            Some(client) => client.clone(),
            None => default_client(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }
}

fn build_client(config: &ClientConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(DIAL_TIMEOUT)
        .tcp_keepalive(KEEP_ALIVE);

    if let Some(auth) = authorization(config)? {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        builder = builder.default_headers(headers);
    }

    if let Some(tls) = &config.tls_config {
        if let Some(ca_file) = &tls.ca_file {
            let pem = std::fs::read(ca_file)
                .with_context(|| format!("reading ca_file {}", ca_file.display()))?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }
        match (&tls.cert_file, &tls.key_file) {
            (Some(cert_file), Some(key_file)) => {
                let cert = std::fs::read(cert_file)
                    .with_context(|| format!("reading cert_file {}", cert_file.display()))?;
                let key = std::fs::read(key_file)
                    .with_context(|| format!("reading key_file {}", key_file.display()))?;
                builder = builder.identity(Identity::from_pkcs8_pem(&cert, &key)?);
            }
            (None, None) => {}
            _ => anyhow::bail!("cert_file and key_file must be set together"),
        }
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    if let Some(proxy_url) = &config.proxy_url {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
    }

    if !config.follow_redirects {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }

    Ok(builder.build()?)
}

fn authorization(config: &ClientConfig) -> Result<Option<HeaderValue>> {
    let bearer = match (&config.bearer_token, &config.bearer_token_file) {
        (Some(token), _) => Some(token.trim().to_string()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading bearer_token_file {}", path.display()))?
                .trim()
                .to_string(),
        ),
        (None, None) => None,
    };

    if let Some(token) = bearer {
        if config.basic_auth.is_some() {
            anyhow::bail!("bearer token and basic auth are mutually exclusive");
        }
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        return Ok(Some(value));
    }

    if let Some(auth) = &config.basic_auth {
        let password = match (&auth.password, &auth.password_file) {
            (Some(password), _) => password.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("reading password_file {}", path.display()))?
                .trim()
                .to_string(),
            (None, None) => String::new(),
        };
        let credentials = format!("{}:{}", auth.username, password);
        let mut value =
            HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(credentials)))?;
        value.set_sensitive(true);
        return Ok(Some(value));
    }

    Ok(None)
}
