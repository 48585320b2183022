//! Utility functions for identifier handling and URL templating.
//!
//! This module contains helper functions for identifier validation,
//! placeholder substitution, and other common operations used throughout the library.

use crate::error::ProbeError;

/// Placeholder for the identifier in profile and probe URL templates.
pub const IDENTIFIER_PLACEHOLDER: &str = "{identifier}";

/// Bare placeholder used by older registry files.
pub const LEGACY_PLACEHOLDER: &str = "{}";

/// Validate an identifier before any service is probed.
///
/// Only rejects identifiers that no service could ever accept. Per-service
/// rules are expressed as validation patterns in the registry.
///
/// # Arguments
///
/// * `identifier` - The candidate username to validate
///
/// # Returns
///
/// `Ok(())` if valid, `Err(ProbeError)` if invalid.
pub fn validate_identifier(identifier: &str) -> Result<(), ProbeError> {
    if identifier.trim().is_empty() {
        return Err(ProbeError::invalid_identifier(
            identifier,
            "Identifier cannot be empty",
        ));
    }

    if identifier.chars().any(char::is_whitespace) {
        return Err(ProbeError::invalid_identifier(
            identifier,
            "Identifier cannot contain whitespace",
        ));
    }

    if identifier.chars().any(char::is_control) {
        return Err(ProbeError::invalid_identifier(
            identifier,
            "Identifier cannot contain control characters",
        ));
    }

    Ok(())
}

/// Whether a URL template carries an identifier placeholder.
pub fn has_placeholder(template: &str) -> bool {
    template.contains(IDENTIFIER_PLACEHOLDER) || template.contains(LEGACY_PLACEHOLDER)
}

/// Substitute the identifier into a URL template.
///
/// Both the `{identifier}` and the legacy `{}` placeholders are replaced in a
/// single pass over the template, so placeholder-like text inside the
/// identifier is never substituted again. The identifier is inserted verbatim;
/// services differ in how they expect special characters, so encoding is left
/// to the registry's validation pattern.
///
/// # Arguments
///
/// * `template` - URL template from the registry
/// * `identifier` - Value to substitute
///
/// # Returns
///
/// The resolved URL.
pub fn substitute_identifier(template: &str, identifier: &str) -> String {
    let mut resolved = String::with_capacity(template.len() + identifier.len());
    let mut rest = template;

    while let Some((start, len)) = [IDENTIFIER_PLACEHOLDER, LEGACY_PLACEHOLDER]
        .iter()
        .filter_map(|placeholder| rest.find(placeholder).map(|i| (i, placeholder.len())))
        .min()
    {
        resolved.push_str(&rest[..start]);
        resolved.push_str(identifier);
        rest = &rest[start + len..];
    }

    resolved.push_str(rest);
    resolved
}

/// Case-insensitive comparison used for `--site` style lookups.
pub fn same_service_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Round a duration to whole milliseconds for reporting.
pub fn duration_to_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
