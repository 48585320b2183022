//! Result aggregation.
//!
//! The [`Aggregator`] folds every finished probe into the run's report exactly
//! once. It is owned by the orchestrator and only ever mutated from its loop,
//! so no locking is involved. [`AggregateReport`] is the finalized, read-only
//! result handed to callers.

use crate::error::ProbeError;
use crate::registry::ServiceDefinition;
use crate::types::{HttpStatus, ProbeResult, Verdict};
use crate::utils::duration_to_ms;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Final entry for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub verdict: Verdict,

    /// Home page of the service
    pub url_main: String,

    /// Resolved profile URL
    pub url_user: String,

    /// Status of the probe, the `unknown` sentinel when it failed.
    /// `None` for illegal identifiers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<HttpStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    /// Body snapshot, only for services detected by message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,

    /// Requests sent for this service
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceReport {
    /// Entry for a service whose validation pattern rejected the identifier.
    pub fn illegal(service: &ServiceDefinition, url_user: String) -> Self {
        Self {
            verdict: Verdict::Illegal,
            url_main: service.url_main.clone(),
            url_user,
            http_status: None,
            response_time_ms: None,
            response_text: None,
            attempts: 0,
            error: None,
        }
    }

    /// Entry for a probed service.
    pub fn probed(
        service: &ServiceDefinition,
        url_user: String,
        verdict: Verdict,
        result: ProbeResult,
    ) -> Self {
        Self {
            verdict,
            url_main: service.url_main.clone(),
            url_user,
            http_status: Some(result.status),
            response_time_ms: result.elapsed.map(duration_to_ms),
            response_text: result.body.filter(|_| service.method.needs_body()),
            attempts: result.attempts,
            error: result.failure.map(|f| f.to_string()),
        }
    }
}

/// Collects per-service entries while a run is in progress.
#[derive(Debug)]
pub struct Aggregator {
    identifier: String,
    entries: Vec<(String, ServiceReport)>,
    seen: HashSet<String>,
    exists: usize,
    started: Instant,
}

impl Aggregator {
    pub fn new<I: Into<String>>(identifier: I, expected: usize) -> Self {
        Self {
            identifier: identifier.into(),
            entries: Vec::with_capacity(expected),
            seen: HashSet::with_capacity(expected),
            exists: 0,
            started: Instant::now(),
        }
    }

    /// Fold one service's entry into the report.
    ///
    /// # Errors
    ///
    /// Entries are final: recording the same service twice is an internal error
    /// and the existing entry is kept.
    pub fn record<N: Into<String>>(&mut self, name: N, report: ServiceReport) -> Result<(), ProbeError> {
        let name = name.into();
        if !self.seen.insert(name.clone()) {
            return Err(ProbeError::internal(format!(
                "service '{}' reported twice",
                name
            )));
        }
        if report.verdict.is_exists() {
            self.exists += 1;
        }
        self.entries.push((name, report));
        Ok(())
    }

    /// Running count of `exists` verdicts.
    pub fn exists(&self) -> usize {
        self.exists
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seal the report once every task has been recorded.
    pub fn finish(self) -> AggregateReport {
        AggregateReport {
            identifier: self.identifier,
            services: self.entries,
            exists: self.exists,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Finalized report for one identifier. Entries are in registry order.
#[derive(Debug, Clone)]
pub struct AggregateReport {
    identifier: String,
    services: Vec<(String, ServiceReport)>,
    exists: usize,
    elapsed: Duration,
}

impl AggregateReport {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn get(&self, service: &str) -> Option<&ServiceReport> {
        self.services
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, report)| report)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceReport)> {
        self.services
            .iter()
            .map(|(name, report)| (name.as_str(), report))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Number of services where the account exists.
    pub fn total_exists(&self) -> usize {
        self.exists
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.services
            .iter()
            .filter(|(_, report)| report.verdict == verdict)
            .count()
    }

    /// `(service, profile URL)` for every service where the account exists.
    pub fn found(&self) -> Vec<(&str, &str)> {
        self.services
            .iter()
            .filter(|(_, report)| report.verdict.is_exists())
            .map(|(name, report)| (name.as_str(), report.url_user.as_str()))
            .collect()
    }

    /// Wall time of the run.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

struct OrderedServices<'a>(&'a [(String, ServiceReport)]);

impl Serialize for OrderedServices<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, report) in self.0 {
            map.serialize_entry(name, report)?;
        }
        map.end()
    }
}

impl Serialize for AggregateReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AggregateReport", 4)?;
        state.serialize_field("identifier", &self.identifier)?;
        state.serialize_field("total_exists", &self.exists)?;
        state.serialize_field("elapsed_ms", &duration_to_ms(self.elapsed))?;
        state.serialize_field("services", &OrderedServices(&self.services))?;
        state.end()
    }
}
