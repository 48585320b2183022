//! Core data types for account probing.
//!
//! This module defines the verdicts, probe results and run configuration
//! shared by the dispatcher, the classifier and the aggregator.

use crate::error::{ProbeError, ProbeFailure};
use crate::proxy::ProxyPool;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Browser user agent sent with every probe. Some services serve a different
/// page to clients they take for bots.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.12; rv:55.0) Gecko/20100101 Firefox/55.0";

/// Default number of retries for a probe whose proxy fails.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Classified outcome of probing one service for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    /// An account with this identifier exists on the service.
    Exists,
    /// The service reports no such account.
    NotExists,
    /// The identifier does not match the service's validation pattern. No request was made.
    Illegal,
    /// Existence could not be determined (failed probe or no usable detection method).
    Indeterminate,
}

impl Verdict {
    pub fn is_exists(self) -> bool {
        self == Verdict::Exists
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Exists => write!(f, "exists"),
            Verdict::NotExists => write!(f, "not-exists"),
            Verdict::Illegal => write!(f, "illegal"),
            Verdict::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// HTTP status of a probe, or the sentinel used when no response was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Code(u16),
    Unknown,
}

impl HttpStatus {
    pub fn code(self) -> Option<u16> {
        match self {
            HttpStatus::Code(code) => Some(code),
            HttpStatus::Unknown => None,
        }
    }

    /// `200 <= status < 300`
    pub fn is_success(self) -> bool {
        matches!(self, HttpStatus::Code(200..=299))
    }
}

impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpStatus::Code(code) => write!(f, "{}", code),
            HttpStatus::Unknown => write!(f, "unknown"),
        }
    }
}

// Numeric codes stay numbers in JSON; the sentinel becomes the string "unknown".
impl Serialize for HttpStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            HttpStatus::Code(code) => serializer.serialize_u16(*code),
            HttpStatus::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

/// Outcome of one probe task's network exchange, after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Status of the last attempt, `Unknown` when no response came back.
    pub status: HttpStatus,

    /// Time taken by the last attempt. `None` when the probe failed.
    pub elapsed: Option<Duration>,

    /// Response body, only kept when the detection method inspects it.
    pub body: Option<String>,

    /// Number of requests sent (initial attempt plus retries).
    pub attempts: u32,

    /// Terminal failure, if the probe never got a response.
    pub failure: Option<ProbeFailure>,
}

impl ProbeResult {
    /// A probe that got a response.
    pub fn response(status: u16, elapsed: Duration, body: Option<String>, attempts: u32) -> Self {
        Self {
            status: HttpStatus::Code(status),
            elapsed: Some(elapsed),
            body,
            attempts,
            failure: None,
        }
    }

    /// A probe that ended in a terminal failure.
    pub fn failed(failure: ProbeFailure, attempts: u32) -> Self {
        Self {
            status: HttpStatus::Unknown,
            elapsed: None,
            body: None,
            attempts,
            failure: Some(failure),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// How probes use the anonymizing network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnonMode {
    /// Direct connections (or through the configured proxies).
    #[default]
    Off,
    /// All probes go through one anonymizing session.
    Shared,
    /// All probes go through one session whose identity is rotated after every probe.
    /// Probes are serialized around the rotation.
    RotatePerProbe,
}

impl FromStr for AnonMode {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" | "false" => Ok(AnonMode::Off),
            "shared" | "on" | "true" => Ok(AnonMode::Shared),
            "rotate-per-probe" | "rotate" | "unique" => Ok(AnonMode::RotatePerProbe),
            other => Err(ProbeError::config(format!(
                "Invalid anonymizing mode '{}'. Use off, shared or rotate-per-probe",
                other
            ))),
        }
    }
}

impl fmt::Display for AnonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnonMode::Off => write!(f, "off"),
            AnonMode::Shared => write!(f, "shared"),
            AnonMode::RotatePerProbe => write!(f, "rotate-per-probe"),
        }
    }
}

/// Where the local Tor daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorSettings {
    /// SOCKS endpoint probes are routed through
    pub socks_url: String,
    /// Control port used to request a new identity
    pub control_addr: String,
    /// Control port password, if `HashedControlPassword` is set
    pub control_password: Option<String>,
}

impl Default for TorSettings {
    fn default() -> Self {
        Self {
            socks_url: "socks5h://127.0.0.1:9050".to_string(),
            control_addr: "127.0.0.1:9051".to_string(),
            control_password: None,
        }
    }
}

/// Configuration options for a probing run.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Maximum number of probes in flight.
    /// Default: 20, Range: 1-500. The effective width is also capped by the registry size.
    pub concurrency: usize,

    /// Timeout for each individual network exchange
    /// Default: 10 seconds
    pub timeout: Duration,

    /// Retries allowed per probe after a proxy failure
    /// Default: 3
    pub max_retries: u32,

    /// Single proxy used for every probe
    pub proxy: Option<String>,

    /// Proxies to pick from at random, and to rotate through on proxy failures
    pub proxy_pool: ProxyPool,

    /// Anonymizing network mode
    pub anon_mode: AnonMode,

    /// Tor endpoints, used when `anon_mode` is not `Off`
    pub tor: TorSettings,

    /// User agent sent with every probe
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            timeout: Duration::from_secs(10),
            max_retries: DEFAULT_MAX_RETRIES,
            proxy: None,
            proxy_pool: ProxyPool::default(),
            anon_mode: AnonMode::Off,
            tor: TorSettings::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ProbeConfig {
    /// Set the worker pool size.
    ///
    /// Automatically capped at 500 to avoid exhausting sockets on huge registries.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, 500);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_proxy<P: Into<String>>(mut self, proxy: P) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_proxy_pool(mut self, pool: ProxyPool) -> Self {
        self.proxy_pool = pool;
        self
    }

    pub fn with_anon_mode(mut self, mode: AnonMode) -> Self {
        self.anon_mode = mode;
        self
    }

    pub fn with_tor_settings(mut self, tor: TorSettings) -> Self {
        self.tor = tor;
        self
    }

    pub fn with_user_agent<U: Into<String>>(mut self, user_agent: U) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Check the configuration for conflicting options.
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.concurrency == 0 {
            return Err(ProbeError::config("Concurrency must be at least 1"));
        }

        if self.timeout.is_zero() {
            return Err(ProbeError::config("Timeout must be greater than zero"));
        }

        if self.anon_mode != AnonMode::Off && (self.proxy.is_some() || !self.proxy_pool.is_empty())
        {
            return Err(ProbeError::config(
                "Tor and proxies cannot be used together",
            ));
        }

        if let Some(proxy) = &self.proxy {
            if proxy.trim().is_empty() {
                return Err(ProbeError::config("Proxy URL cannot be empty"));
            }
        }

        Ok(())
    }
}
