//! reqwest-backed transport.
//!
//! reqwest fixes the redirect policy and proxy per client, so clients are built
//! lazily per (redirect policy, proxy) pair and reused for the rest of the run.

use super::{ProbeRequest, RawResponse, RequestMethod, Transport};
use crate::error::{FailureKind, TransportError};
use crate::types::{AnonMode, ProbeConfig};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Mutex;
use std::time::Duration;

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Bytes of a response body kept for classification. The rest is not read.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    follow_redirects: bool,
    proxy: Option<String>,
}

/// Production transport over HTTP(S), optionally through HTTP or SOCKS proxies.
pub struct HttpTransport {
    timeout: Duration,
    user_agent: String,
    body_limit: usize,
    /// Keep idle connections between probes. Off under identity rotation,
    /// where a pooled connection would stay on the previous circuit.
    reuse_connections: bool,
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

impl HttpTransport {
    pub fn new<U: Into<String>>(timeout: Duration, user_agent: U) -> Self {
        Self {
            timeout,
            user_agent: user_agent.into(),
            body_limit: MAX_BODY_BYTES,
            reuse_connections: true,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Create a transport with the timeout and user agent of a run configuration.
    ///
    /// Connection reuse is disabled when the identity rotates after every probe.
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.timeout, config.user_agent.clone())
            .with_connection_reuse(config.anon_mode != AnonMode::RotatePerProbe)
    }

    /// Cap the number of body bytes read per response.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn with_connection_reuse(mut self, reuse: bool) -> Self {
        self.reuse_connections = reuse;
        self
    }

    fn client(&self, key: ClientKey) -> Result<reqwest::Client, TransportError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| TransportError::new(FailureKind::Unknown, "client cache poisoned"))?;

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let policy = if key.follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout)
            .redirect(policy);

        if !self.reuse_connections {
            builder = builder.pool_max_idle_per_host(0);
        }

        if let Some(proxy_url) = &key.proxy {
            let proxy = reqwest::Proxy::all(proxy_url.as_str()).map_err(|e| {
                TransportError::proxy(format!("invalid proxy '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| classify_error(&e, key.proxy.is_some()))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ProbeRequest) -> Result<RawResponse, TransportError> {
        let proxied = request.proxy.is_some();
        let client = self.client(ClientKey {
            follow_redirects: request.follow_redirects,
            proxy: request.proxy.clone(),
        })?;

        let builder = match request.method {
            RequestMethod::Head => client.head(&request.url),
            RequestMethod::Get => client.get(&request.url),
        };

        let mut response = builder
            .send()
            .await
            .map_err(|e| classify_error(&e, proxied))?;
        let status = response.status().as_u16();

        let body = match request.method {
            RequestMethod::Head => None,
            RequestMethod::Get => Some(read_body(&mut response, self.body_limit, proxied).await?),
        };

        Ok(RawResponse::new(status, body))
    }
}

/// Read at most `limit` bytes of the body. Invalid UTF-8 is replaced, not rejected.
async fn read_body(
    response: &mut reqwest::Response,
    limit: usize,
    proxied: bool,
) -> Result<String, TransportError> {
    let mut bytes = Vec::new();

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| classify_error(&e, proxied))?
    {
        let room = limit - bytes.len();
        if chunk.len() > room {
            bytes.extend_from_slice(&chunk[..room]);
            tracing::debug!(url = %response.url(), limit, "response body truncated");
            break;
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Map a reqwest error onto the failure categories the retry logic understands.
///
/// reqwest does not flag proxy failures separately. A connection that fails
/// while routed through a proxy is attributed to the proxy.
fn classify_error(err: &reqwest::Error, proxied: bool) -> TransportError {
    let message = error_chain(err);

    let kind = if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_connect() {
        if proxied {
            FailureKind::Proxy
        } else {
            FailureKind::Connection
        }
    } else if err.is_builder() && proxied {
        FailureKind::Proxy
    } else if err.is_redirect() || err.is_status() || err.is_body() || err.is_decode() {
        FailureKind::Protocol
    } else {
        FailureKind::Unknown
    };

    TransportError::new(kind, message)
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
