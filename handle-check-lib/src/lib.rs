//! # Handle Check Library
//!
//! A concurrent engine that checks whether an account with a given username
//! exists on each of a large set of web services.
//!
//! Every service in the registry gets exactly one probe per identifier. Probes
//! run concurrently, proxy failures are retried through other proxies, and each
//! response is classified with the service's own detection rule. A run always
//! ends with a complete report: services that could not be reached are marked
//! `indeterminate` rather than left out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use handle_check_lib::{AccountChecker, Registry, Verdict};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let checker = AccountChecker::new(Registry::builtin()?);
//!     let report = checker.check_identifier("octocat").await?;
//!
//!     for (service, entry) in report.iter() {
//!         if entry.verdict == Verdict::Exists {
//!             println!("{}: {}", service, entry.url_user);
//!         }
//!     }
//!     println!("Total Websites : {}", report.total_exists());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Registry driven**: services and their detection rules are data, not code
//! - **Detection methods**: body marker, status code, or non-redirected status
//! - **Proxy rotation**: bounded retries through a pool on proxy failures
//! - **Tor support**: shared session or a fresh identity per probe
//! - **Pluggable transport**: swap the HTTP layer out for tests

// Re-export main public API types and functions
// This makes them available as handle_check_lib::TypeName
pub use aggregate::{AggregateReport, Aggregator, ServiceReport};
pub use checker::AccountChecker;
pub use classify::classify;
pub use config::{
    load_env_config, parse_timeout_string, ConfigManager, DefaultsConfig, EnvConfig, FileConfig,
    TorConfig,
};
pub use dispatcher::{plan, Dispatcher, FinishedProbe, PendingProbe, ProbeOutcome, ProbePlan};
pub use error::{FailureKind, ProbeError, ProbeFailure, RegistryLoadError, TransportError};
pub use proxy::ProxyPool;
pub use registry::{DetectionMethod, Registry, ServiceDefinition};
pub use retry::{RetryBudget, RetryDecision, RetryManager};
pub use transport::{
    AnonymizingSession, HttpTransport, ProbeRequest, RawResponse, RequestMethod, TorSession,
    Transport,
};
pub use types::{
    AnonMode, HttpStatus, ProbeConfig, ProbeResult, TorSettings, Verdict, DEFAULT_MAX_RETRIES,
    DEFAULT_USER_AGENT,
};
pub use utils::{substitute_identifier, validate_identifier};

// Public modules
pub mod transport;

// Internal modules - these are not part of the public API
mod aggregate;
mod checker;
mod classify;
mod config;
mod dispatcher;
mod error;
mod proxy;
mod registry;
mod retry;
mod types;
mod utils;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ProbeError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Get library information for debugging or display purposes.
pub fn info() -> LibraryInfo {
    LibraryInfo {
        version: VERSION,
        author: AUTHOR,
        builtin_services: Registry::builtin().map(|r| r.len()).unwrap_or(0),
    }
}

/// Information about the library build
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub version: &'static str,
    pub author: &'static str,
    /// Number of services in the embedded registry
    pub builtin_services: usize,
}
