//! Main account checker implementation.
//!
//! This module provides the `AccountChecker` struct that orchestrates a run for
//! one identifier: validate, dispatch, join in registry order, classify and
//! aggregate.

use crate::aggregate::{AggregateReport, Aggregator, ServiceReport};
use crate::classify::classify;
use crate::dispatcher::{Dispatcher, ProbeOutcome};
use crate::error::ProbeError;
use crate::registry::Registry;
use crate::retry::RetryManager;
use crate::transport::{AnonymizingSession, HttpTransport, TorSession, Transport};
use crate::types::{AnonMode, ProbeConfig};
use crate::utils::validate_identifier;
use futures_util::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

/// Main checker that coordinates account probing across a registry.
///
/// The `AccountChecker` owns the registry and the run configuration and handles:
/// - Concurrent dispatch of one probe per service
/// - Proxy rotation on proxy failures
/// - Anonymizing sessions and identity rotation
/// - Classification and aggregation in registry order
///
/// # Example
///
/// ```rust,no_run
/// use handle_check_lib::{AccountChecker, Registry};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let checker = AccountChecker::new(Registry::builtin()?);
///     let report = checker.check_identifier("octocat").await?;
///     for (service, url) in report.found() {
///         println!("{}: {}", service, url);
///     }
///     Ok(())
/// }
/// ```
pub struct AccountChecker {
    /// Services probed in every run
    registry: Registry,
    /// Configuration settings for this checker instance
    config: ProbeConfig,
    /// Sends the probes
    transport: Arc<dyn Transport>,
    /// Anonymizing session, present unless the anonymizing mode is off
    session: Option<Arc<dyn AnonymizingSession>>,
}

impl AccountChecker {
    /// Create a checker with default configuration.
    ///
    /// Default settings:
    /// - Concurrency: 20
    /// - Timeout: 10 seconds
    /// - Retries: 3
    /// - Direct connections, no anonymizing session
    pub fn new(registry: Registry) -> Self {
        let config = ProbeConfig::default();
        let transport = Arc::new(HttpTransport::from_config(&config));
        Self {
            registry,
            config,
            transport,
            session: None,
        }
    }

    /// Create a checker with custom configuration.
    ///
    /// A Tor session is attached when the anonymizing mode is not `off`.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::ConfigError` if the configuration is inconsistent.
    ///
    /// # Example
    ///
    /// ```rust
    /// use handle_check_lib::{AccountChecker, ProbeConfig, Registry};
    /// use std::time::Duration;
    ///
    /// let config = ProbeConfig::default()
    ///     .with_concurrency(50)
    ///     .with_timeout(Duration::from_secs(5));
    ///
    /// let checker = AccountChecker::with_config(Registry::builtin().unwrap(), config).unwrap();
    /// ```
    pub fn with_config(registry: Registry, config: ProbeConfig) -> Result<Self, ProbeError> {
        config.validate()?;

        let transport = Arc::new(HttpTransport::from_config(&config));
        let session: Option<Arc<dyn AnonymizingSession>> = match config.anon_mode {
            AnonMode::Off => None,
            AnonMode::Shared | AnonMode::RotatePerProbe => {
                Some(Arc::new(TorSession::new(config.tor.clone())))
            }
        };

        Ok(Self {
            registry,
            config,
            transport,
            session,
        })
    }

    /// Replace the transport, e.g. with a scripted one in tests.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the anonymizing session. Only used when the anonymizing mode is not `off`.
    pub fn with_session(mut self, session: Arc<dyn AnonymizingSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Probe every service in the registry for one identifier.
    ///
    /// The checking process:
    /// 1. Validates the identifier
    /// 2. Opens the anonymizing session, if one is configured
    /// 3. Dispatches one probe per service without waiting
    /// 4. Joins the probes in registry order, classifies and aggregates each
    ///
    /// # Arguments
    ///
    /// * `identifier` - The username to look for (e.g., "octocat")
    ///
    /// # Returns
    ///
    /// An `AggregateReport` with exactly one entry per registry service.
    /// Network failures never abort the run; the affected services are
    /// reported `indeterminate`.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError` if:
    /// - The identifier is invalid
    /// - The anonymizing session cannot be opened
    pub async fn check_identifier(&self, identifier: &str) -> Result<AggregateReport, ProbeError> {
        validate_identifier(identifier)?;

        let dispatcher = self.dispatcher().await?;
        let pending = dispatcher.dispatch(identifier, &self.registry);
        let mut aggregator = Aggregator::new(identifier, self.registry.len());

        for probe in pending {
            let finished = probe.join().await;
            let service = finished.service;

            let report = match finished.outcome {
                ProbeOutcome::Illegal => ServiceReport::illegal(&service, finished.profile_url),
                ProbeOutcome::Completed(result) => {
                    let verdict = classify(&service.method, &result);
                    tracing::debug!(
                        service = %service.name,
                        status = %result.status,
                        attempts = result.attempts,
                        verdict = %verdict,
                        "probe classified"
                    );
                    ServiceReport::probed(&service, finished.profile_url, verdict, result)
                }
            };

            aggregator.record(service.name.as_str(), report)?;
        }

        let report = aggregator.finish();
        tracing::info!(
            identifier,
            services = report.len(),
            exists = report.total_exists(),
            elapsed_ms = report.elapsed().as_millis() as u64,
            "run complete"
        );
        Ok(report)
    }

    /// Run one full report per identifier, one identifier after the other.
    ///
    /// # Returns
    ///
    /// Vector of `AggregateReport` in the same order as the input identifiers.
    pub async fn check_identifiers(
        &self,
        identifiers: &[String],
    ) -> Result<Vec<AggregateReport>, ProbeError> {
        let mut reports = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            reports.push(self.check_identifier(identifier).await?);
        }
        Ok(reports)
    }

    /// Check identifiers and yield each report as soon as its run finishes.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use futures_util::StreamExt;
    /// use handle_check_lib::{AccountChecker, Registry};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let checker = AccountChecker::new(Registry::builtin()?);
    ///     let identifiers = vec!["octocat".to_string(), "torvalds".to_string()];
    ///
    ///     let mut stream = checker.check_identifiers_stream(&identifiers);
    ///     while let Some(report) = stream.next().await {
    ///         let report = report?;
    ///         println!("{}: {} found", report.identifier(), report.total_exists());
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn check_identifiers_stream(
        &self,
        identifiers: &[String],
    ) -> Pin<Box<dyn Stream<Item = Result<AggregateReport, ProbeError>> + Send + '_>> {
        let identifiers = identifiers.to_vec();
        let stream = futures_util::stream::iter(identifiers)
            .then(move |identifier| async move { self.check_identifier(&identifier).await });

        Box::pin(stream)
    }

    async fn dispatcher(&self) -> Result<Dispatcher, ProbeError> {
        let retry = RetryManager::new(self.config.max_retries, self.config.proxy_pool.clone());
        let mut dispatcher = Dispatcher::new(self.transport.clone(), retry, self.config.concurrency)
            .with_proxy(self.config.proxy.clone());

        if self.config.anon_mode == AnonMode::Off {
            return Ok(dispatcher);
        }

        let session = self.session.clone().ok_or_else(|| {
            ProbeError::config(format!(
                "anonymizing mode '{}' requires a session",
                self.config.anon_mode
            ))
        })?;
        let proxy = session.new_session().await.map_err(|e| {
            ProbeError::network_with_source("cannot open anonymizing session", e.to_string())
        })?;
        dispatcher = dispatcher.with_session_proxy(Some(proxy));

        if self.config.anon_mode == AnonMode::RotatePerProbe {
            dispatcher = dispatcher.with_rotation(session);
        }
        Ok(dispatcher)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get the current configuration for this checker.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}
