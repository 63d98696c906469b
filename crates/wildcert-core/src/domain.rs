//! DNS name syntax checks shared by request validation and CSR construction

use crate::error::{Error, Result};

/// Validate that a string is a syntactically valid DNS name
///
/// Implements the RFC 1035 label rules (ASCII letters, digits and hyphens,
/// 1-63 characters per label, 253 characters total). A single leading `*.`
/// label is accepted when `allow_wildcard` is set.
pub fn validate_dns_name(name: &str, allow_wildcard: bool) -> std::result::Result<(), String> {
    let host = match name.strip_prefix("*.") {
        Some(rest) if allow_wildcard => rest,
        Some(_) => return Err(format!("Wildcard names are not allowed here: '{}'", name)),
        None => name,
    };

    if host.is_empty() {
        return Err("Domain name cannot be empty".to_string());
    }

    if name.len() > 253 {
        return Err(format!(
            "Domain name too long: {} chars (max 253). Got: {}",
            name.len(),
            name
        ));
    }

    for label in host.split('.') {
        if label.is_empty() {
            return Err(format!("Domain name has empty label: '{}'", name));
        }

        if label.len() > 63 {
            return Err(format!(
                "Domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            ));
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(format!(
                "Domain label contains invalid characters. Label: '{}'. \
                Valid: ASCII alphanumeric and hyphen only.",
                label
            ));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!(
                "Domain label cannot start or end with hyphen. Label: '{}'",
                label
            ));
        }
    }

    Ok(())
}

/// Validate a primary (non-wildcard) domain, surfacing a configuration error
pub fn validate_primary_domain(domain: &str) -> Result<()> {
    validate_dns_name(domain, false).map_err(Error::config)
}

/// The wildcard companion of a primary domain
pub fn wildcard_of(domain: &str) -> String {
    format!("*.{}", domain)
}

/// Record name used for the DNS-01 challenge of an identifier
///
/// Wildcard identifiers are validated on the base name, so `*.example.com`
/// and `example.com` share `_acme-challenge.example.com`.
pub fn challenge_record_name(identifier: &str) -> String {
    let base = identifier.strip_prefix("*.").unwrap_or(identifier);
    format!("_acme-challenge.{}", base)
}
