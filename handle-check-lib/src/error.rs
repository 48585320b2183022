//! Error handling for probing operations.
//!
//! Errors come in three layers:
//! - [`ProbeError`] aborts a whole run (bad identifier, unusable registry or config).
//! - [`TransportError`] is what a single network exchange reports back.
//! - [`ProbeFailure`] is the terminal outcome of one probe task. It never aborts
//!   the run; the service simply ends up `indeterminate` in the report.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Main error type for run-level failures.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The identifier cannot be probed at all (empty, whitespace, ...)
    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    /// The service registry could not be loaded. Always fatal.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryLoadError),

    /// Configuration errors (invalid settings, conflicting options)
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File I/O errors when reading config or proxy lists
    #[error("File error at '{path}': {message}")]
    FileError { path: String, message: String },

    /// Network errors outside of a probe (e.g. fetching a remote registry)
    #[error("Network error: {message} ({detail})")]
    Network { message: String, detail: String },

    /// Generic internal errors that don't fit other categories
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ProbeError {
    /// Create a new invalid identifier error.
    pub fn invalid_identifier<I: Into<String>, R: Into<String>>(identifier: I, reason: R) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new network error with source information.
    pub fn network_with_source<M: Into<String>, S: Into<String>>(message: M, detail: S) -> Self {
        Self::Network {
            message: message.into(),
            detail: detail.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: format!("I/O error: {}", err),
        }
    }
}

/// Failure to turn a registry source into a usable set of service definitions.
///
/// Every variant is a configuration error: no partial registry is ever returned.
#[derive(Debug, Error)]
pub enum RegistryLoadError {
    #[error("cannot read registry '{source_name}': {message}")]
    Unreadable {
        source_name: String,
        message: String,
    },

    #[error("malformed registry: {message}")]
    Malformed { message: String },

    #[error("service '{service}' is missing required field '{field}'")]
    MissingField {
        service: String,
        field: &'static str,
    },

    #[error("service '{service}' is defined more than once")]
    DuplicateService { service: String },

    #[error("service '{service}' uses unknown detection method '{method}'")]
    UnknownDetectionMethod { service: String, method: String },

    #[error("service '{service}' uses message detection but has no absence marker")]
    MissingAbsenceMarker { service: String },

    #[error("service '{service}' has an invalid validation pattern '{pattern}': {message}")]
    InvalidPattern {
        service: String,
        pattern: String,
        message: String,
    },

    #[error("service '{service}' template '{template}' has no identifier placeholder")]
    MissingPlaceholder { service: String, template: String },
}

impl RegistryLoadError {
    pub fn malformed<M: Into<String>>(message: M) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn unreadable<S: Into<String>, M: Into<String>>(source_name: S, message: M) -> Self {
        Self::Unreadable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Category of a failed network exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// The proxy in use refused, dropped or could not be reached.
    Proxy,
    /// The target could not be reached (DNS, refused, reset).
    Connection,
    /// The exchange exceeded the transport timeout.
    Timeout,
    /// The exchange completed at the socket level but the HTTP layer failed.
    Protocol,
    /// Anything the transport could not categorize.
    Unknown,
}

impl FailureKind {
    /// Only proxy failures are worth retrying, and only through another proxy.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Proxy)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Proxy => write!(f, "Proxy error"),
            FailureKind::Connection => write!(f, "Error connecting"),
            FailureKind::Timeout => write!(f, "Timeout error"),
            FailureKind::Protocol => write!(f, "HTTP error"),
            FailureKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Error reported by a [`Transport`](crate::Transport) for one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub fn new<M: Into<String>>(kind: FailureKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn proxy<M: Into<String>>(message: M) -> Self {
        Self::new(FailureKind::Proxy, message)
    }

    pub fn connection<M: Into<String>>(message: M) -> Self {
        Self::new(FailureKind::Connection, message)
    }

    pub fn timeout<M: Into<String>>(message: M) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn protocol<M: Into<String>>(message: M) -> Self {
        Self::new(FailureKind::Protocol, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Terminal failure of a single probe task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    /// A non-retryable transport failure, or a proxy failure with no pool to rotate through.
    #[error("{0}")]
    Transport(TransportError),

    /// Every attempt failed with a proxy error.
    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: TransportError },

    /// The worker task running the probe panicked or was cancelled.
    #[error("probe task aborted: {message}")]
    TaskAborted { message: String },
}

impl ProbeFailure {
    /// The transport category behind this failure, if there is one.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            ProbeFailure::Transport(e) => Some(e.kind),
            ProbeFailure::RetryExhausted { last, .. } => Some(last.kind),
            ProbeFailure::TaskAborted { .. } => None,
        }
    }
}
