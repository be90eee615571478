//! HTTP client integration for key-set retrieval.

// crates.io
use http::{
	HeaderValue, StatusCode,
	header::{ACCEPT, ETAG, IF_NONE_MATCH},
};
use jsonwebtoken::jwk::JwkSet;
use reqwest::{Client, redirect::Policy};
// self
use crate::{_prelude::*, config::ProviderConfig, security};

/// Outcome of a single key-set request.
#[derive(Clone, Debug)]
pub enum KeySetFetch {
	/// The origin returned a key set.
	Modified {
		/// Parsed key set.
		jwks: JwkSet,
		/// Entity tag advertised alongside the body.
		etag: Option<String>,
	},
	/// The origin confirmed the previously fetched key set is current (HTTP 304).
	NotModified,
}

/// Build the HTTP client used for key discovery.
pub fn build_client(config: &ProviderConfig) -> Result<Client> {
	let allowed_hosts = config.allowed_hosts.clone();
	let redirect = Policy::custom(move |attempt| {
		if attempt.previous().len() >= 3 {
			attempt.error("too many redirects")
		} else if attempt.url().scheme() != "https"
			&& attempt.previous().first().is_some_and(|first| first.scheme() == "https")
		{
			attempt.error("redirect downgraded to plain HTTP")
		} else if attempt
			.url()
			.host_str()
			.is_some_and(|host| !security::host_is_allowed(host, &allowed_hosts))
		{
			attempt.error("redirect left the key discovery allowlist")
		} else {
			attempt.follow()
		}
	});

	Ok(Client::builder()
		.redirect(redirect)
		.user_agent(format!("signin-reconcile/{}", env!("CARGO_PKG_VERSION")))
		.connect_timeout(Duration::from_secs(5))
		.build()?)
}

/// Fetch the provider key set, revalidating against `etag` when one is known.
pub async fn fetch_key_set(
	client: &Client,
	config: &ProviderConfig,
	etag: Option<&str>,
	attempt_timeout: Duration,
) -> Result<KeySetFetch> {
	security::check_key_url(&config.jwks_url, config.require_https, &config.allowed_hosts)?;

	let mut request = client
		.get(config.jwks_url.clone())
		.header(ACCEPT, "application/json")
		.timeout(attempt_timeout);

	if let Some(value) = etag.and_then(|tag| HeaderValue::from_str(tag).ok()) {
		request = request.header(IF_NONE_MATCH, value);
	}

	let start = Instant::now();
	let mut response = request.send().await?;
	let status = response.status();

	if status == StatusCode::NOT_MODIFIED {
		tracing::debug!(provider = %config.provider_id, "key set not modified");

		return Ok(KeySetFetch::NotModified);
	}
	if !status.is_success() {
		let body = response.text().await.ok();

		return Err(Error::HttpStatus { status, url: config.jwks_url.clone(), body });
	}

	let etag = response
		.headers()
		.get(ETAG)
		.and_then(|value| value.to_str().ok())
		.map(|value| value.to_string());

	if let Some(length) = response.content_length()
		&& length > config.max_response_bytes
	{
		return Err(oversized(length, config.max_response_bytes));
	}

	let mut bytes = Vec::new();

	while let Some(chunk) = response.chunk().await? {
		let received = (bytes.len() + chunk.len()) as u64;

		if received > config.max_response_bytes {
			return Err(oversized(received, config.max_response_bytes));
		}

		bytes.extend_from_slice(&chunk);
	}

	let jwks: JwkSet = serde_json::from_slice(&bytes)?;

	tracing::debug!(
		provider = %config.provider_id,
		keys = jwks.keys.len(),
		elapsed = ?start.elapsed(),
		"key set fetch complete"
	);

	Ok(KeySetFetch::Modified { jwks, etag })
}

fn oversized(size: u64, limit: u64) -> Error {
	Error::Validation {
		field: "max_response_bytes",
		reason: format!("Response size {size} bytes exceeds the guard of {limit} bytes."),
	}
}
