//! Integration tests for handle-check-lib
//!
//! The orchestrator is driven through a scripted in-memory transport, so these
//! tests never touch the network. The last few tests run the real HTTP
//! transport against a local wiremock server.

use async_trait::async_trait;
use handle_check_lib::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = dyn Fn(&ProbeRequest) -> std::result::Result<RawResponse, TransportError> + Send + Sync;

/// Transport that answers from a closure and records every request.
struct ScriptedTransport {
    respond: Box<Responder>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<ProbeRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    fn new<F>(respond: F) -> Self
    where
        F: Fn(&ProbeRequest) -> std::result::Result<RawResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn status(code: u16) -> Self {
        Self::new(move |_| Ok(RawResponse::new(code, None)))
    }

    fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    fn calls(&self) -> Vec<ProbeRequest> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ProbeRequest) -> std::result::Result<RawResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&request.url)
            .copied()
            .unwrap_or(Duration::from_millis(5));
        tokio::time::sleep(delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(request)
    }
}

/// Session that counts rotations instead of talking to Tor.
#[derive(Default)]
struct CountingSession {
    rotations: AtomicUsize,
}

#[async_trait]
impl AnonymizingSession for CountingSession {
    async fn new_session(&self) -> std::result::Result<String, TransportError> {
        Ok("socks5h://127.0.0.1:9050".to_string())
    }

    async fn rotate_identity(&self) -> std::result::Result<(), TransportError> {
        self.rotations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn alpha_registry(method: &str, extra: &str) -> Registry {
    let json = format!(
        r#"{{"Alpha": {{"urlMain": "https://x/", "url": "https://x/{{identifier}}", "errorType": "{}"{}}}}}"#,
        method, extra
    );
    Registry::from_json_str(&json).unwrap()
}

fn numbered_registry(count: usize) -> Registry {
    let entries: Vec<String> = (0..count)
        .map(|i| {
            format!(
                r#""S{i}": {{"urlMain": "https://s{i}/", "url": "https://s{i}/{{identifier}}", "errorType": "status_code"}}"#
            )
        })
        .collect();
    Registry::from_json_str(&format!("{{{}}}", entries.join(","))).unwrap()
}

fn checker(registry: Registry, config: ProbeConfig, transport: Arc<ScriptedTransport>) -> AccountChecker {
    AccountChecker::with_config(registry, config)
        .unwrap()
        .with_transport(transport)
}

#[tokio::test]
async fn test_status_code_exists() {
    let transport = Arc::new(ScriptedTransport::status(200));
    let checker = checker(alpha_registry("status-code", ""), ProbeConfig::default(), transport.clone());

    let report = checker.check_identifier("bob").await.unwrap();
    let alpha = report.get("Alpha").unwrap();
    assert_eq!(alpha.verdict, Verdict::Exists);
    assert_eq!(alpha.http_status, Some(HttpStatus::Code(200)));
    assert_eq!(alpha.url_user, "https://x/bob");
    assert_eq!(report.total_exists(), 1);
    assert_eq!(transport.calls()[0].url, "https://x/bob");
}

#[tokio::test]
async fn test_status_code_not_exists() {
    let transport = Arc::new(ScriptedTransport::status(404));
    let checker = checker(alpha_registry("status-code", ""), ProbeConfig::default(), transport);

    let report = checker.check_identifier("bob").await.unwrap();
    let alpha = report.get("Alpha").unwrap();
    assert_eq!(alpha.verdict, Verdict::NotExists);
    assert_eq!(alpha.http_status, Some(HttpStatus::Code(404)));
    assert_eq!(report.total_exists(), 0);
}

#[tokio::test]
async fn test_illegal_identifier_makes_no_request() {
    let transport = Arc::new(ScriptedTransport::status(200));
    let registry = alpha_registry("status-code", r#", "regexCheck": "^[a-z]+$""#);
    let checker = checker(registry, ProbeConfig::default(), transport.clone());

    let report = checker.check_identifier("bob1").await.unwrap();
    let alpha = report.get("Alpha").unwrap();
    assert_eq!(alpha.verdict, Verdict::Illegal);
    assert_eq!(alpha.http_status, None);
    assert_eq!(alpha.response_time_ms, None);
    assert_eq!(alpha.attempts, 0);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_message_detection() {
    let registry = alpha_registry("message", r#", "errorMsg": "not found""#);

    let missing = Arc::new(ScriptedTransport::new(|_| {
        Ok(RawResponse::new(200, Some("user not found".to_string())))
    }));
    let report = checker(registry.clone(), ProbeConfig::default(), missing)
        .check_identifier("bob")
        .await
        .unwrap();
    assert_eq!(report.get("Alpha").unwrap().verdict, Verdict::NotExists);

    let present = Arc::new(ScriptedTransport::new(|_| {
        Ok(RawResponse::new(200, Some("profile of bob".to_string())))
    }));
    let report = checker(registry, ProbeConfig::default(), present.clone())
        .check_identifier("bob")
        .await
        .unwrap();
    let alpha = report.get("Alpha").unwrap();
    assert_eq!(alpha.verdict, Verdict::Exists);
    assert_eq!(alpha.response_text.as_deref(), Some("profile of bob"));
    assert_eq!(present.calls()[0].method, RequestMethod::Get);
}

#[tokio::test]
async fn test_proxy_failures_exhaust_retry_budget() {
    let transport = Arc::new(ScriptedTransport::new(|_| {
        Err(TransportError::proxy("connection refused"))
    }));
    let config = ProbeConfig::default()
        .with_max_retries(3)
        .with_proxy_pool(ProxyPool::new(["socks5://10.0.0.1:1080", "socks5://10.0.0.2:1080"]));
    let checker = checker(alpha_registry("status-code", ""), config, transport.clone());

    let report = checker.check_identifier("bob").await.unwrap();
    let alpha = report.get("Alpha").unwrap();
    assert_eq!(alpha.verdict, Verdict::Indeterminate);
    assert_eq!(alpha.http_status, Some(HttpStatus::Unknown));
    assert_eq!(alpha.attempts, 4);
    assert!(alpha.error.as_deref().unwrap().contains("gave up after 4 attempts"));

    let calls = transport.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|r| r.proxy.is_some()));
}

#[tokio::test]
async fn test_proxy_recovers_on_retry() {
    let failures = Arc::new(AtomicUsize::new(0));
    let seen = failures.clone();
    let transport = Arc::new(ScriptedTransport::new(move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(TransportError::proxy("dead proxy"))
        } else {
            Ok(RawResponse::new(200, None))
        }
    }));
    let config = ProbeConfig::default().with_proxy_pool(ProxyPool::new(["http://10.0.0.1:3128"]));
    let report = checker(alpha_registry("status-code", ""), config, transport)
        .check_identifier("bob")
        .await
        .unwrap();

    let alpha = report.get("Alpha").unwrap();
    assert_eq!(alpha.verdict, Verdict::Exists);
    assert_eq!(alpha.attempts, 2);
}

#[tokio::test]
async fn test_proxy_failure_without_pool_is_terminal() {
    let transport = Arc::new(ScriptedTransport::new(|_| Err(TransportError::proxy("refused"))));
    let config = ProbeConfig::default().with_proxy("socks5://10.0.0.9:1080");
    let report = checker(alpha_registry("status-code", ""), config, transport.clone())
        .check_identifier("bob")
        .await
        .unwrap();

    assert_eq!(report.get("Alpha").unwrap().verdict, Verdict::Indeterminate);
    assert_eq!(transport.calls().len(), 1);
    assert_eq!(
        transport.calls()[0].proxy.as_deref(),
        Some("socks5://10.0.0.9:1080")
    );
}

#[tokio::test]
async fn test_timeouts_are_not_retried() {
    let transport = Arc::new(ScriptedTransport::new(|_| Err(TransportError::timeout("slow"))));
    let config = ProbeConfig::default().with_proxy_pool(ProxyPool::new(["http://10.0.0.1:3128"]));
    let report = checker(alpha_registry("status-code", ""), config, transport.clone())
        .check_identifier("bob")
        .await
        .unwrap();

    let alpha = report.get("Alpha").unwrap();
    assert_eq!(alpha.verdict, Verdict::Indeterminate);
    assert_eq!(alpha.attempts, 1);
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_report_covers_registry_in_order() {
    let registry = numbered_registry(6);
    // First service is the slowest, failures sprinkled in.
    let transport = ScriptedTransport::new(|req| match req.url.as_str() {
        "https://s1/bob" => Err(TransportError::connection("refused")),
        "https://s4/bob" => Err(TransportError::new(FailureKind::Unknown, "??")),
        "https://s2/bob" => Ok(RawResponse::new(404, None)),
        _ => Ok(RawResponse::new(200, None)),
    })
    .with_delay("https://s0/bob", Duration::from_millis(80));

    let report = checker(registry.clone(), ProbeConfig::default(), Arc::new(transport))
        .check_identifier("bob")
        .await
        .unwrap();

    assert_eq!(report.len(), registry.len());
    let names: Vec<&str> = report.iter().map(|(name, _)| name).collect();
    assert_eq!(names, registry.names());
    assert_eq!(report.count(Verdict::Exists), 3);
    assert_eq!(report.count(Verdict::NotExists), 1);
    assert_eq!(report.count(Verdict::Indeterminate), 2);
    assert_eq!(report.total_exists(), 3);
}

#[tokio::test]
async fn test_panicking_task_is_isolated() {
    let registry = numbered_registry(3);
    let transport = ScriptedTransport::new(|req| {
        if req.url == "https://s0/bob" {
            panic!("transport blew up");
        }
        Ok(RawResponse::new(200, None))
    });

    let report = checker(registry.clone(), ProbeConfig::default(), Arc::new(transport))
        .check_identifier("bob")
        .await
        .unwrap();

    assert_eq!(report.len(), registry.len());
    let names: Vec<&str> = report.iter().map(|(name, _)| name).collect();
    assert_eq!(names, registry.names());

    let s0 = report.get("S0").unwrap();
    assert_eq!(s0.verdict, Verdict::Indeterminate);
    assert_eq!(s0.http_status, Some(HttpStatus::Unknown));
    assert_eq!(s0.attempts, 0);
    assert!(s0.error.is_some());

    assert_eq!(report.get("S1").unwrap().verdict, Verdict::Exists);
    assert_eq!(report.get("S2").unwrap().verdict, Verdict::Exists);
    assert_eq!(report.total_exists(), 2);
}

#[tokio::test]
async fn test_request_shape_per_method() {
    let json = r#"{
        "Status": {"urlMain": "https://a/", "url": "https://a/{identifier}", "errorType": "status_code"},
        "Pinned": {"urlMain": "https://b/", "url": "https://b/{identifier}", "errorType": "status_code", "alwaysFetchBody": true},
        "Redirect": {"urlMain": "https://c/", "url": "https://c/{identifier}", "errorType": "response_url"},
        "Probe": {"urlMain": "https://d/", "url": "https://d/{identifier}", "urlProbe": "https://api.d/{identifier}", "errorType": "message", "errorMsg": "nope"}
    }"#;
    let registry = Registry::from_json_str(json).unwrap();
    let transport = Arc::new(ScriptedTransport::new(|_| {
        Ok(RawResponse::new(200, Some("hello".to_string())))
    }));
    let report = checker(registry, ProbeConfig::default(), transport.clone())
        .check_identifier("bob")
        .await
        .unwrap();

    let by_url: HashMap<String, ProbeRequest> = transport
        .calls()
        .into_iter()
        .map(|r| (r.url.clone(), r))
        .collect();

    assert_eq!(by_url["https://a/bob"].method, RequestMethod::Head);
    assert!(by_url["https://a/bob"].follow_redirects);
    assert_eq!(by_url["https://b/bob"].method, RequestMethod::Get);
    assert!(!by_url["https://c/bob"].follow_redirects);
    assert!(by_url.contains_key("https://api.d/bob"));
    assert!(!by_url.contains_key("https://d/bob"));

    // the profile URL is still the one reported
    assert_eq!(report.get("Probe").unwrap().url_user, "https://d/bob");
    // only message services keep the body
    assert_eq!(report.get("Pinned").unwrap().response_text, None);
}

#[tokio::test]
async fn test_unset_method_is_probed_but_indeterminate() {
    let transport = Arc::new(ScriptedTransport::status(200));
    let report = checker(alpha_registry("", ""), ProbeConfig::default(), transport.clone())
        .check_identifier("bob")
        .await
        .unwrap();

    let alpha = report.get("Alpha").unwrap();
    assert_eq!(alpha.verdict, Verdict::Indeterminate);
    assert_eq!(alpha.http_status, Some(HttpStatus::Code(200)));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let transport = Arc::new(ScriptedTransport::status(200));
    let config = ProbeConfig::default().with_concurrency(2);
    let report = checker(numbered_registry(8), config, transport.clone())
        .check_identifier("bob")
        .await
        .unwrap();

    assert_eq!(report.len(), 8);
    assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_rotate_per_probe_serializes_and_rotates() {
    let transport = Arc::new(ScriptedTransport::status(200));
    let session = Arc::new(CountingSession::default());
    let config = ProbeConfig::default()
        .with_concurrency(10)
        .with_anon_mode(AnonMode::RotatePerProbe);

    let report = checker(numbered_registry(5), config, transport.clone())
        .with_session(session.clone())
        .check_identifier("bob")
        .await
        .unwrap();

    assert_eq!(report.total_exists(), 5);
    assert_eq!(session.rotations.load(Ordering::SeqCst), 5);
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(transport
        .calls()
        .iter()
        .all(|r| r.proxy.as_deref() == Some("socks5h://127.0.0.1:9050")));
}

#[tokio::test]
async fn test_shared_session_does_not_rotate() {
    let transport = Arc::new(ScriptedTransport::status(200));
    let session = Arc::new(CountingSession::default());
    let config = ProbeConfig::default().with_anon_mode(AnonMode::Shared);

    checker(numbered_registry(3), config, transport.clone())
        .with_session(session.clone())
        .check_identifier("bob")
        .await
        .unwrap();

    assert_eq!(session.rotations.load(Ordering::SeqCst), 0);
    assert_eq!(transport.calls().len(), 3);
    assert!(transport
        .calls()
        .iter()
        .all(|r| r.proxy.as_deref() == Some("socks5h://127.0.0.1:9050")));
}

#[tokio::test]
async fn test_invalid_identifier_is_rejected() {
    let transport = Arc::new(ScriptedTransport::status(200));
    let checker = checker(alpha_registry("status-code", ""), ProbeConfig::default(), transport.clone());
    assert!(matches!(
        checker.check_identifier("  ").await,
        Err(ProbeError::InvalidIdentifier { .. })
    ));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_tor_and_proxy_conflict() {
    let config = ProbeConfig::default()
        .with_proxy("http://10.0.0.1:3128")
        .with_anon_mode(AnonMode::Shared);
    assert!(AccountChecker::with_config(alpha_registry("status-code", ""), config).is_err());
}

#[tokio::test]
async fn test_multiple_identifiers() {
    let transport = Arc::new(ScriptedTransport::new(|req| {
        let code = if req.url.ends_with("/alice") { 200 } else { 404 };
        Ok(RawResponse::new(code, None))
    }));
    let checker = checker(alpha_registry("status-code", ""), ProbeConfig::default(), transport.clone());

    let reports = checker
        .check_identifiers(&["alice".to_string(), "bob".to_string()])
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].identifier(), "alice");
    assert_eq!(reports[0].total_exists(), 1);
    assert_eq!(reports[1].total_exists(), 0);
    assert_eq!(transport.calls_to("https://x/alice"), 1);
}

#[tokio::test]
async fn test_identifier_stream() {
    use futures_util::StreamExt;

    let transport = Arc::new(ScriptedTransport::status(200));
    let checker = checker(alpha_registry("status-code", ""), ProbeConfig::default(), transport);
    let identifiers = vec!["alice".to_string(), "bob".to_string()];

    let reports: Vec<_> = checker.check_identifiers_stream(&identifiers).collect().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.as_ref().unwrap().total_exists() == 1));
}

#[test]
fn test_library_exports_work() {
    let info = info();
    assert!(!info.version.is_empty());
    assert!(info.builtin_services > 0);

    let config = ProbeConfig::default();
    assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
}

mod http {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_end_to_end_against_local_server() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/status/bob"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/message/bob"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Sorry, no such user"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/redirect/bob"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/signup"),
            )
            .mount(&server)
            .await;
        Mock::given(path("/signup"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let base = server.uri();
        let json = format!(
            r#"{{
                "Status": {{"urlMain": "{base}/", "url": "{base}/status/{{identifier}}", "errorType": "status_code"}},
                "Message": {{"urlMain": "{base}/", "url": "{base}/message/{{identifier}}", "errorType": "message", "errorMsg": "no such user"}},
                "Redirect": {{"urlMain": "{base}/", "url": "{base}/redirect/{{identifier}}", "errorType": "response_url"}}
            }}"#
        );
        let registry = Registry::from_json_str(&json).unwrap();
        let config = ProbeConfig::default().with_timeout(Duration::from_secs(5));
        let checker = AccountChecker::with_config(registry, config).unwrap();

        let report = checker.check_identifier("bob").await.unwrap();
        assert_eq!(report.get("Status").unwrap().verdict, Verdict::Exists);
        assert_eq!(report.get("Message").unwrap().verdict, Verdict::NotExists);
        let redirect = report.get("Redirect").unwrap();
        assert_eq!(redirect.verdict, Verdict::NotExists);
        assert_eq!(redirect.http_status, Some(HttpStatus::Code(302)));
        assert!(redirect.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_remote_registry_fetch() {
        let server = MockServer::start().await;
        Mock::given(path("/services.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"A": {"urlMain": "https://a/", "url": "https://a/{identifier}", "errorType": "status_code"}}"#,
            ))
            .mount(&server)
            .await;

        let registry = Registry::load_source(&format!("{}/services.json", server.uri()))
            .await
            .unwrap();
        assert_eq!(registry.names(), vec!["A"]);

        let err = Registry::fetch(&format!("{}/missing.json", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryLoadError::Unreadable { .. }));
    }
}
