//! Probe dispatch.
//!
//! For one identifier the dispatcher plans a probe per service, short-circuits
//! services whose validation pattern rejects the identifier, and spawns one
//! task per remaining service. Tasks run concurrently, capped by a semaphore.
//! Each task owns its retry budget and runs an explicit bounded retry loop.
//!
//! Under identity rotation, every exchange holds the session lock until the
//! rotation that follows it has completed, so probes sharing the session run
//! one at a time.

use crate::error::{ProbeFailure, TransportError};
use crate::registry::{DetectionMethod, Registry, ServiceDefinition};
use crate::retry::{RetryDecision, RetryManager};
use crate::transport::{AnonymizingSession, ProbeRequest, RawResponse, RequestMethod, Transport};
use crate::types::ProbeResult;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

/// What to do for one service before any network I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbePlan {
    /// The identifier fails the service's validation pattern. No request is made.
    Illegal,
    /// Send this request.
    Request(ProbeRequest),
}

/// Plan the probe for one service.
///
/// The dedicated probe URL wins over the profile URL. Status-code services get
/// a HEAD request unless the entry insists on fetching the body; everything else
/// is a GET. Redirects are followed except for `response-url` services, whose
/// verdict depends on the status of the original request.
pub fn plan(service: &ServiceDefinition, identifier: &str, proxy: Option<String>) -> ProbePlan {
    if !service.accepts(identifier) {
        return ProbePlan::Illegal;
    }

    let method = match service.method {
        DetectionMethod::StatusCode if !service.always_fetch_body => RequestMethod::Head,
        _ => RequestMethod::Get,
    };

    ProbePlan::Request(ProbeRequest {
        url: service.probe_url(identifier),
        method,
        follow_redirects: service.method.follows_redirects(),
        proxy,
    })
}

/// Outcome of one service's probe task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Illegal,
    Completed(ProbeResult),
}

/// A dispatched probe, waiting to be joined.
pub struct PendingProbe {
    pub service: Arc<ServiceDefinition>,
    pub profile_url: String,
    task: Option<JoinHandle<ProbeResult>>,
}

/// A joined probe.
#[derive(Debug, Clone)]
pub struct FinishedProbe {
    pub service: Arc<ServiceDefinition>,
    pub profile_url: String,
    pub outcome: ProbeOutcome,
}

impl PendingProbe {
    /// Wait for the probe task. A panicked task yields a `TaskAborted` failure.
    pub async fn join(self) -> FinishedProbe {
        let outcome = match self.task {
            None => ProbeOutcome::Illegal,
            Some(handle) => match handle.await {
                Ok(result) => ProbeOutcome::Completed(result),
                Err(e) => {
                    tracing::error!(service = %self.service.name, error = %e, "probe task aborted");
                    ProbeOutcome::Completed(ProbeResult::failed(
                        ProbeFailure::TaskAborted {
                            message: e.to_string(),
                        },
                        0,
                    ))
                }
            },
        };

        FinishedProbe {
            service: self.service,
            profile_url: self.profile_url,
            outcome,
        }
    }
}

struct Rotation {
    session: Arc<dyn AnonymizingSession>,
    lock: Mutex<()>,
}

/// State shared by every probe task of a run.
#[derive(Clone)]
struct ProbeContext {
    transport: Arc<dyn Transport>,
    retry: RetryManager,
    proxy: Option<String>,
    session_proxy: Option<String>,
    rotation: Option<Arc<Rotation>>,
}

impl ProbeContext {
    /// Single proxy, else a random pool member, else the anonymizing session, else direct.
    fn initial_proxy(&self) -> Option<String> {
        self.proxy
            .clone()
            .or_else(|| self.retry.pool().choose().map(str::to_string))
            .or_else(|| self.session_proxy.clone())
    }

    async fn exchange(
        &self,
        request: &ProbeRequest,
    ) -> (Result<RawResponse, TransportError>, Duration) {
        match &self.rotation {
            Some(rotation) => {
                let _guard = rotation.lock.lock().await;
                let started = Instant::now();
                let result = self.transport.send(request).await;
                let elapsed = started.elapsed();
                if let Err(e) = rotation.session.rotate_identity().await {
                    tracing::warn!(error = %e, "identity rotation failed");
                }
                (result, elapsed)
            }
            None => {
                let started = Instant::now();
                let result = self.transport.send(request).await;
                (result, started.elapsed())
            }
        }
    }
}

/// Fans probes for one identifier out over the registry.
pub struct Dispatcher {
    context: ProbeContext,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryManager, concurrency: usize) -> Self {
        Self {
            context: ProbeContext {
                transport,
                retry,
                proxy: None,
                session_proxy: None,
                rotation: None,
            },
            concurrency: concurrency.max(1),
        }
    }

    /// Route every probe through a single proxy.
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.context.proxy = proxy;
        self
    }

    /// Route probes through an anonymizing session at `proxy`.
    pub fn with_session_proxy(mut self, proxy: Option<String>) -> Self {
        self.context.session_proxy = proxy;
        self
    }

    /// Rotate the session's identity after every exchange.
    pub fn with_rotation(mut self, session: Arc<dyn AnonymizingSession>) -> Self {
        self.context.rotation = Some(Arc::new(Rotation {
            session,
            lock: Mutex::new(()),
        }));
        self
    }

    /// Spawn the probes for `identifier`, one per registry entry, in registry order.
    ///
    /// Must be called from within a tokio runtime. Dispatch does not block;
    /// join the returned probes to collect the results.
    pub fn dispatch(&self, identifier: &str, registry: &Registry) -> Vec<PendingProbe> {
        let width = self.concurrency.min(registry.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(width));
        let context = Arc::new(self.context.clone());

        registry
            .shared()
            .map(|service| {
                let profile_url = service.profile_url(identifier);
                let task = match plan(service, identifier, context.initial_proxy()) {
                    ProbePlan::Illegal => {
                        tracing::debug!(service = %service.name, identifier, "identifier rejected by validation pattern");
                        None
                    }
                    ProbePlan::Request(request) => Some(tokio::spawn(run_probe(
                        context.clone(),
                        service.clone(),
                        request,
                        semaphore.clone(),
                    ))),
                };

                PendingProbe {
                    service: service.clone(),
                    profile_url,
                    task,
                }
            })
            .collect()
    }
}

/// One probe task: send, and on a proxy failure retry through another proxy
/// until the budget runs out.
async fn run_probe(
    context: Arc<ProbeContext>,
    service: Arc<ServiceDefinition>,
    mut request: ProbeRequest,
    semaphore: Arc<Semaphore>,
) -> ProbeResult {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            return ProbeResult::failed(
                ProbeFailure::TaskAborted {
                    message: e.to_string(),
                },
                0,
            )
        }
    };

    let mut budget = context.retry.budget();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        tracing::debug!(
            service = %service.name,
            url = %request.url,
            method = %request.method,
            attempt = attempts,
            proxy = request.proxy.as_deref().unwrap_or("direct"),
            "dispatching probe"
        );

        let (result, elapsed) = context.exchange(&request).await;

        let error = match result {
            Ok(response) => {
                let body = if service.method.needs_body() {
                    response.body
                } else {
                    None
                };
                return ProbeResult::response(response.status, elapsed, body, attempts);
            }
            Err(error) => error,
        };

        match context.retry.decide(&mut budget, &error) {
            RetryDecision::Retry { proxy } => {
                tracing::warn!(
                    service = %service.name,
                    attempt = attempts,
                    error = %error,
                    proxy = %proxy,
                    "proxy failed, retrying through another proxy"
                );
                request.proxy = Some(proxy);
            }
            RetryDecision::NotRetryable | RetryDecision::NoPool => {
                tracing::warn!(service = %service.name, error = %error, "probe failed");
                return ProbeResult::failed(ProbeFailure::Transport(error), attempts);
            }
            RetryDecision::Exhausted => {
                tracing::warn!(service = %service.name, attempts, error = %error, "retries exhausted");
                return ProbeResult::failed(
                    ProbeFailure::RetryExhausted {
                        attempts,
                        last: error,
                    },
                    attempts,
                );
            }
        }
    }
}
