//! Service registry: which services to probe and how to read their answers.
//!
//! The registry is a JSON object mapping a service name to its definition.
//! Field names follow the widely shared username-search data format:
//!
//! ```json
//! {
//!   "GitHub": {
//!     "urlMain": "https://www.github.com/",
//!     "url": "https://www.github.com/{identifier}",
//!     "errorType": "status_code",
//!     "regexCheck": "^[a-zA-Z0-9-]{1,39}$",
//!     "alwaysFetchBody": true
//!   }
//! }
//! ```
//!
//! Loading is all-or-nothing. Any malformed entry fails the whole load, and
//! a loaded registry is immutable, so it can be shared freely between probe tasks.

use crate::error::{ProbeError, RegistryLoadError};
use crate::utils::{has_placeholder, same_service_name, substitute_identifier};
use regex::Regex;
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Registry shipped with the library.
const BUILTIN_REGISTRY: &str = include_str!("../data/services.json");

/// Timeout for fetching a remote registry.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How a service's response reveals whether an account exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionMethod {
    /// The account exists unless the body contains `absence_marker`.
    Message { absence_marker: String },
    /// The account exists iff the status is 2xx.
    StatusCode,
    /// The account exists iff the status of the original, non-redirected request is 2xx.
    ResponseUrl,
    /// No usable method. The service is probed but always reported `indeterminate`.
    Unset,
}

impl DetectionMethod {
    /// Parse a registry method tag. Both `status-code` and `status_code` spellings are accepted.
    fn parse(
        service: &str,
        tag: &str,
        absence_marker: Option<String>,
    ) -> Result<Self, RegistryLoadError> {
        match tag.trim() {
            "" => Ok(DetectionMethod::Unset),
            "status-code" | "status_code" => Ok(DetectionMethod::StatusCode),
            "response-url" | "response_url" => Ok(DetectionMethod::ResponseUrl),
            "message" => match absence_marker {
                Some(marker) if !marker.is_empty() => Ok(DetectionMethod::Message {
                    absence_marker: marker,
                }),
                _ => Err(RegistryLoadError::MissingAbsenceMarker {
                    service: service.to_string(),
                }),
            },
            other => Err(RegistryLoadError::UnknownDetectionMethod {
                service: service.to_string(),
                method: other.to_string(),
            }),
        }
    }

    /// Whether classification needs the response body.
    pub fn needs_body(&self) -> bool {
        matches!(self, DetectionMethod::Message { .. })
    }

    /// Whether the probe should follow redirects.
    pub fn follows_redirects(&self) -> bool {
        !matches!(self, DetectionMethod::ResponseUrl)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            DetectionMethod::Message { .. } => "message",
            DetectionMethod::StatusCode => "status-code",
            DetectionMethod::ResponseUrl => "response-url",
            DetectionMethod::Unset => "",
        }
    }
}

/// One service to probe.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    /// Unique name of the service
    pub name: String,
    /// Home page of the service
    pub url_main: String,
    /// Profile URL template
    pub url_user: String,
    /// Separate URL to probe instead of the profile URL
    pub url_probe: Option<String>,
    /// How to interpret the response
    pub method: DetectionMethod,
    /// Always fetch the full body, even when the method only needs the status
    pub always_fetch_body: bool,
    validation: Option<Regex>,
}

impl ServiceDefinition {
    /// Build a definition from its parts, compiling the validation pattern.
    ///
    /// # Errors
    ///
    /// Returns `RegistryLoadError` if a template lacks the identifier
    /// placeholder or the validation pattern does not compile.
    pub fn new(
        name: impl Into<String>,
        url_main: impl Into<String>,
        url_user: impl Into<String>,
        method: DetectionMethod,
    ) -> Result<Self, RegistryLoadError> {
        let name = name.into();
        let url_user = url_user.into();

        if !has_placeholder(&url_user) {
            return Err(RegistryLoadError::MissingPlaceholder {
                service: name,
                template: url_user,
            });
        }

        Ok(Self {
            name,
            url_main: url_main.into(),
            url_user,
            url_probe: None,
            method,
            always_fetch_body: false,
            validation: None,
        })
    }

    pub fn with_probe_url(mut self, url_probe: impl Into<String>) -> Result<Self, RegistryLoadError> {
        let url_probe = url_probe.into();
        if !has_placeholder(&url_probe) {
            return Err(RegistryLoadError::MissingPlaceholder {
                service: self.name,
                template: url_probe,
            });
        }
        self.url_probe = Some(url_probe);
        Ok(self)
    }

    pub fn with_validation(mut self, pattern: &str) -> Result<Self, RegistryLoadError> {
        let regex = Regex::new(pattern).map_err(|e| RegistryLoadError::InvalidPattern {
            service: self.name.clone(),
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        self.validation = Some(regex);
        Ok(self)
    }

    pub fn with_always_fetch_body(mut self, always: bool) -> Self {
        self.always_fetch_body = always;
        self
    }

    /// Whether the identifier passes this service's validation pattern.
    /// Services without a pattern accept everything.
    pub fn accepts(&self, identifier: &str) -> bool {
        self.validation
            .as_ref()
            .map_or(true, |regex| regex.is_match(identifier))
    }

    pub fn validation_pattern(&self) -> Option<&str> {
        self.validation.as_ref().map(Regex::as_str)
    }

    /// Profile URL reported to the user.
    pub fn profile_url(&self, identifier: &str) -> String {
        substitute_identifier(&self.url_user, identifier)
    }

    /// URL the probe is sent to.
    pub fn probe_url(&self, identifier: &str) -> String {
        match &self.url_probe {
            Some(template) => substitute_identifier(template, identifier),
            None => self.profile_url(identifier),
        }
    }
}

/// Registry entry as it appears in the JSON source.
#[derive(Debug, Deserialize)]
struct RawService {
    #[serde(rename = "urlMain")]
    url_main: Option<String>,
    url: Option<String>,
    #[serde(rename = "urlProbe")]
    url_probe: Option<String>,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
    #[serde(rename = "errorMsg")]
    error_msg: Option<String>,
    #[serde(rename = "regexCheck")]
    regex_check: Option<String>,
    #[serde(rename = "alwaysFetchBody", default)]
    always_fetch_body: bool,
}

impl RawService {
    fn into_definition(self, name: String) -> Result<ServiceDefinition, RegistryLoadError> {
        let missing = |field: &'static str| RegistryLoadError::MissingField {
            service: name.clone(),
            field,
        };

        let url_main = self.url_main.ok_or_else(|| missing("urlMain"))?;
        let url_user = self.url.ok_or_else(|| missing("url"))?;
        let tag = self.error_type.ok_or_else(|| missing("errorType"))?;
        let method = DetectionMethod::parse(&name, &tag, self.error_msg)?;

        let mut service = ServiceDefinition::new(name, url_main, url_user, method)?
            .with_always_fetch_body(self.always_fetch_body);

        if let Some(url_probe) = self.url_probe.filter(|u| !u.trim().is_empty()) {
            service = service.with_probe_url(url_probe)?;
        }
        if let Some(pattern) = self.regex_check.filter(|p| !p.is_empty()) {
            service = service.with_validation(&pattern)?;
        }

        Ok(service)
    }
}

/// Ordered registry entries as they appear in the source document.
struct RawRegistry(Vec<(String, RawService)>);

impl<'de> Deserialize<'de> for RawRegistry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawRegistryVisitor;

        impl<'de> Visitor<'de> for RawRegistryVisitor {
            type Value = RawRegistry;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping service names to definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(name) = map.next_key::<String>()? {
                    // "$schema" and friends
                    if name.starts_with('$') {
                        map.next_value::<IgnoredAny>()?;
                        continue;
                    }
                    let raw = map
                        .next_value::<RawService>()
                        .map_err(|e| de::Error::custom(format!("service '{}': {}", name, e)))?;
                    entries.push((name, raw));
                }
                Ok(RawRegistry(entries))
            }
        }

        deserializer.deserialize_map(RawRegistryVisitor)
    }
}

/// The set of services probed in a run, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    services: Vec<Arc<ServiceDefinition>>,
}

impl Registry {
    /// Build a registry from already constructed definitions.
    ///
    /// # Errors
    ///
    /// Returns `RegistryLoadError::DuplicateService` if two definitions share a name.
    pub fn from_services(
        services: impl IntoIterator<Item = ServiceDefinition>,
    ) -> Result<Self, RegistryLoadError> {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        for service in services {
            if !seen.insert(service.name.clone()) {
                return Err(RegistryLoadError::DuplicateService {
                    service: service.name,
                });
            }
            list.push(Arc::new(service));
        }
        Ok(Self { services: list })
    }

    /// Parse a registry from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, RegistryLoadError> {
        let raw: RawRegistry =
            serde_json::from_str(json).map_err(|e| RegistryLoadError::malformed(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut definitions = Vec::with_capacity(raw.0.len());
        for (name, entry) in raw.0 {
            if !seen.insert(name.clone()) {
                return Err(RegistryLoadError::DuplicateService { service: name });
            }
            definitions.push(entry.into_definition(name)?);
        }

        tracing::debug!(services = definitions.len(), "registry parsed");
        Self::from_services(definitions)
    }

    /// Load a registry from a local JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RegistryLoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RegistryLoadError::unreadable(path.display().to_string(), e.to_string()))?;
        Self::from_json_str(&content)
    }

    /// Fetch a registry over HTTP(S).
    pub async fn fetch(url: &str) -> Result<Self, RegistryLoadError> {
        let unreadable = |e: reqwest::Error| RegistryLoadError::unreadable(url, e.to_string());

        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(unreadable)?;
        let response = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(unreadable)?;
        let body = response.text().await.map_err(unreadable)?;

        Self::from_json_str(&body)
    }

    /// Load from a file path or an `http(s)://` URL.
    pub async fn load_source(source: &str) -> Result<Self, RegistryLoadError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            Self::fetch(source).await
        } else {
            Self::load(source)
        }
    }

    /// The registry embedded in the library.
    pub fn builtin() -> Result<Self, RegistryLoadError> {
        Self::from_json_str(BUILTIN_REGISTRY)
    }

    /// Restrict the registry to the named services, keeping registry order.
    ///
    /// Names are matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns a configuration error listing every name that matched no service.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, ProbeError> {
        let unknown: Vec<&str> = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|wanted| !self.services.iter().any(|s| same_service_name(&s.name, wanted)))
            .collect();
        if !unknown.is_empty() {
            return Err(ProbeError::config(format!(
                "Unknown service(s): {}",
                unknown.join(", ")
            )));
        }

        let services = self
            .services
            .iter()
            .filter(|s| names.iter().any(|n| same_service_name(&s.name, n.as_ref())))
            .cloned()
            .collect();
        Ok(Self { services })
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.iter().map(|s| s.as_ref())
    }

    /// Shared handles to the definitions, for handing to probe tasks.
    pub(crate) fn shared(&self) -> impl Iterator<Item = &Arc<ServiceDefinition>> {
        self.services.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
