//! Response classification.
//!
//! Turns the outcome of a probe into a [`Verdict`] using the service's
//! detection method. Failed probes are always `indeterminate`.

use crate::registry::DetectionMethod;
use crate::types::{ProbeResult, Verdict};

/// Classify a finished probe.
///
/// | method         | `exists` iff                                   |
/// |----------------|------------------------------------------------|
/// | `message`      | the absence marker is not in the body          |
/// | `status-code`  | status is 2xx                                  |
/// | `response-url` | status of the non-redirected request is 2xx    |
/// | unset          | never, always `indeterminate`                  |
///
/// Marker matching is a case-sensitive substring test. A `message` probe that
/// somehow came back without a body cannot be judged and is `indeterminate`.
pub fn classify(method: &DetectionMethod, result: &ProbeResult) -> Verdict {
    if result.is_failure() {
        return Verdict::Indeterminate;
    }

    match method {
        DetectionMethod::Message { absence_marker } => match &result.body {
            Some(body) if body.contains(absence_marker.as_str()) => Verdict::NotExists,
            Some(_) => Verdict::Exists,
            None => Verdict::Indeterminate,
        },
        DetectionMethod::StatusCode | DetectionMethod::ResponseUrl => {
            if result.status.is_success() {
                Verdict::Exists
            } else {
                Verdict::NotExists
            }
        }
        DetectionMethod::Unset => Verdict::Indeterminate,
    }
}
