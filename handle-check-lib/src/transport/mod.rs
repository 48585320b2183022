//! Network seam between the probing engine and the outside world.
//!
//! The engine never talks to sockets directly. It hands a [`ProbeRequest`] to a
//! [`Transport`] and gets back a [`RawResponse`] or a categorized
//! [`TransportError`]. [`HttpTransport`] is the production implementation;
//! tests plug in scripted transports.
//!
//! The anonymizing network is modelled separately as an [`AnonymizingSession`]
//! with its two operations: open a session and rotate its identity.

pub mod http;
pub mod tor;

pub use http::HttpTransport;
pub use tor::TorSession;

use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt;

/// HTTP method of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    /// Metadata only, no body transfer.
    Head,
    Get,
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestMethod::Head => write!(f, "HEAD"),
            RequestMethod::Get => write!(f, "GET"),
        }
    }
}

/// One outbound probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub url: String,
    pub method: RequestMethod,
    /// When false, a redirect response is returned as-is.
    pub follow_redirects: bool,
    /// Proxy URL to route through, `None` for a direct connection.
    pub proxy: Option<String>,
}

/// What came back from a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// `None` for HEAD requests.
    pub body: Option<String>,
}

impl RawResponse {
    pub fn new(status: u16, body: Option<String>) -> Self {
        Self { status, body }
    }
}

/// Sends probes. Implementations must be safe to share between concurrent probe tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one exchange. Timeouts are enforced by the transport.
    async fn send(&self, request: &ProbeRequest) -> Result<RawResponse, TransportError>;
}

/// A shared session on an anonymizing network.
#[async_trait]
pub trait AnonymizingSession: Send + Sync {
    /// Prepare the session and return the proxy URL probes must be routed through.
    async fn new_session(&self) -> Result<String, TransportError>;

    /// Ask the network for a fresh identity (new circuit). Subsequent probes
    /// through the session appear to come from a different origin.
    async fn rotate_identity(&self) -> Result<(), TransportError>;
}
