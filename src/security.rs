//! Key-discovery URL hardening: HTTPS enforcement and host allowlists.
//!
//! Signing keys decide which tokens are trusted, so the endpoint they are fetched from is held to
//! the same standard as the keys themselves.

// std
use std::collections::HashSet;
// crates.io
use serde::{Deserialize, de::Deserializer};
use url::Url;
// self
use crate::_prelude::*;

/// Lowercase a hostname and strip surrounding whitespace and any trailing dot.
pub fn canonical_host(value: &str) -> Option<String> {
	let host = value.trim().trim_end_matches('.');

	if host.is_empty() { None } else { Some(host.to_ascii_lowercase()) }
}

/// Canonicalise allowlist entries, dropping empties and duplicates while keeping order.
pub fn normalize_allowlist(hosts: Vec<String>) -> Vec<String> {
	let mut seen = HashSet::with_capacity(hosts.len());

	hosts
		.into_iter()
		.filter_map(|host| canonical_host(&host))
		.filter(|host| seen.insert(host.clone()))
		.collect()
}

/// `serde` helper that normalises the allowlist during deserialisation.
pub fn deserialize_allowed_hosts<'de, D>(
	deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(normalize_allowlist(Vec::<String>::deserialize(deserializer)?))
}

/// Whether `host` equals an allowlisted entry or is one of its subdomains.
///
/// An empty allowlist admits every host.
pub fn host_is_allowed(host: &str, allowed: &[String]) -> bool {
	if allowed.is_empty() {
		return true;
	}

	let Some(host) = canonical_host(host) else {
		return false;
	};

	allowed.iter().filter_map(|entry| canonical_host(entry)).any(|entry| {
		host == entry
			|| host.strip_suffix(entry.as_str()).is_some_and(|prefix| prefix.ends_with('.'))
	})
}

/// Reject any scheme other than HTTPS.
pub fn enforce_https(url: &Url) -> Result<()> {
	if url.scheme() == "https" {
		Ok(())
	} else {
		Err(Error::Security(format!("Key discovery URL {url} must use HTTPS.")))
	}
}

/// Apply the full key-discovery URL policy.
pub fn check_key_url(url: &Url, require_https: bool, allowed_hosts: &[String]) -> Result<()> {
	if require_https {
		enforce_https(url)?;
	}

	let host = url.host_str().ok_or_else(|| Error::Validation {
		field: "jwks_url",
		reason: "Must include a host component.".into(),
	})?;

	if !host_is_allowed(host, allowed_hosts) {
		return Err(Error::Security(format!(
			"Host '{host}' is not in the key discovery allowlist."
		)));
	}

	Ok(())
}
