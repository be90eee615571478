//! Provider, retry, and reconciler configuration.
//!
//! Every value is injected at construction time; nothing is read from process-global state.

// std
use std::cell::RefCell;
// crates.io
use jsonwebtoken::Algorithm;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, hooks::HookFailurePolicy, security};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Canonical issuer of Sign in with Apple identity tokens.
pub const APPLE_ISSUER: &str = "https://appleid.apple.com";
/// Apple's key-discovery (JWKS) endpoint.
pub const APPLE_KEYS_URL: &str = "https://appleid.apple.com/auth/keys";
/// Default minimum spacing between two key-set fetches triggered by unknown key ids.
///
/// Zero: every miss re-fetches, with concurrent misses sharing one fetch.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::ZERO;
/// Default size guard for key-set responses (256 KiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 262_144;
/// Default clock-skew allowance in seconds for `exp`.
pub const DEFAULT_LEEWAY_SECS: u64 = 60;
/// Default timeout applied to every persistence call.
pub const DEFAULT_PERSISTENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Supported jitter strategies for retry policies.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Randomise between 80% and 100% of the computed backoff.
	#[default]
	Full,
	/// Decorrelated jitter bounded by three times the previous delay.
	Decorrelated,
}

/// Retry configuration bounding key-discovery fetches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Maximum number of retries after the initial request.
	pub max_retries: u32,
	/// Timeout applied to each individual HTTP attempt.
	pub attempt_timeout: Duration,
	/// Initial delay before retrying after a failure.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Overall deadline for the whole retry sequence.
	pub deadline: Duration,
	/// Strategy used to randomise the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "retry_policy.attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::Validation {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}
		if self.deadline < self.attempt_timeout {
			return Err(Error::Validation {
				field: "retry_policy.deadline",
				reason: "Must be greater than or equal to attempt_timeout.".into(),
			});
		}

		Ok(())
	}

	/// Exponential backoff for the given retry attempt with jitter applied.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(16) as i32;
		let bounded = self
			.initial_backoff
			.mul_f64(2f64.powi(exponent))
			.min(self.max_backoff)
			.max(self.initial_backoff);

		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full =>
				random_within(bounded.mul_f64(0.8).max(self.initial_backoff), bounded),
			JitterStrategy::Decorrelated => {
				let prev = if attempt == 0 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(prev.mul_f64(3.0)).max(self.initial_backoff);

				random_within(self.initial_backoff, ceiling)
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 2,
			attempt_timeout: Duration::from_secs(3),
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(2),
			deadline: Duration::from_secs(8),
			jitter: JitterStrategy::Full,
		}
	}
}

/// Audience allow-list: a token must name at least one of these client identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceConfig {
	/// Bundle identifier of the native app.
	pub apple_bundle_audience: String,
	/// Services identifier used by the web sign-in flow.
	pub apple_web_audience: String,
}
impl AudienceConfig {
	/// Construct the allow-list from the two client identifiers.
	pub fn new(
		apple_bundle_audience: impl Into<String>,
		apple_web_audience: impl Into<String>,
	) -> Self {
		Self {
			apple_bundle_audience: apple_bundle_audience.into(),
			apple_web_audience: apple_web_audience.into(),
		}
	}

	/// Allow-listed audience values.
	pub fn values(&self) -> [&str; 2] {
		[self.apple_bundle_audience.as_str(), self.apple_web_audience.as_str()]
	}

	/// Whether any of the presented audiences is allow-listed.
	pub fn accepts<'a, I>(&self, presented: I) -> bool
	where
		I: IntoIterator<Item = &'a str>,
	{
		let allowed = self.values();

		presented.into_iter().any(|aud| allowed.contains(&aud))
	}
}

/// Identity provider settings consumed by the key cache and token verifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
	/// Short provider label used in logs and metrics.
	pub provider_id: String,
	/// Issuer string every accepted token must carry verbatim.
	pub issuer: String,
	/// Key-discovery endpoint publishing the provider's signing keys.
	pub jwks_url: Url,
	/// Audience allow-list.
	pub audiences: AudienceConfig,
	/// Asymmetric algorithms accepted in token headers.
	#[serde(default = "default_algorithms")]
	pub allowed_algorithms: Vec<Algorithm>,
	/// Whether the key-discovery endpoint must be served over HTTPS.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Optional host allowlist for the key-discovery endpoint.
	#[serde(default, deserialize_with = "crate::security::deserialize_allowed_hosts")]
	pub allowed_hosts: Vec<String>,
	/// Minimum spacing between successful key-set fetches triggered by unknown key ids.
	///
	/// Opt-in throttle against forged key ids. A non-zero value delays acceptance of keys
	/// rotated in within the window.
	#[serde(default = "default_min_refresh_interval")]
	pub min_refresh_interval: Duration,
	/// Maximum size of a key-set response in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
	/// Clock-skew allowance in seconds applied to `exp`.
	#[serde(default = "default_leeway")]
	pub leeway: u64,
	/// Retry policy for key-discovery fetches.
	#[serde(default)]
	pub retry_policy: RetryPolicy,
}
impl ProviderConfig {
	/// Construct a provider configuration with default cache and retry settings.
	pub fn new(
		provider_id: impl Into<String>,
		issuer: impl Into<String>,
		jwks_url: impl AsRef<str>,
		audiences: AudienceConfig,
	) -> Result<Self> {
		Ok(Self {
			provider_id: provider_id.into(),
			issuer: issuer.into(),
			jwks_url: Url::parse(jwks_url.as_ref())?,
			audiences,
			allowed_algorithms: default_algorithms(),
			require_https: true,
			allowed_hosts: Vec::new(),
			min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			leeway: DEFAULT_LEEWAY_SECS,
			retry_policy: RetryPolicy::default(),
		})
	}

	/// Sign in with Apple: Apple's issuer and key endpoint, pinned to `appleid.apple.com`.
	pub fn apple(audiences: AudienceConfig) -> Result<Self> {
		let mut config = Self::new("apple", APPLE_ISSUER, APPLE_KEYS_URL, audiences)?;

		config.allowed_hosts = vec!["appleid.apple.com".into()];

		Ok(config)
	}

	/// Set the HTTPS requirement for the key-discovery endpoint.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Override the minimum refresh interval.
	pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
		self.min_refresh_interval = interval;

		self
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.provider_id.trim().is_empty() {
			return Err(Error::Validation {
				field: "provider_id",
				reason: "Must not be empty.".into(),
			});
		}
		if self.issuer.trim().is_empty() {
			return Err(Error::Validation { field: "issuer", reason: "Must not be empty.".into() });
		}
		if self.audiences.values().iter().any(|aud| aud.trim().is_empty()) {
			return Err(Error::Validation {
				field: "audiences",
				reason: "Audience values must not be empty.".into(),
			});
		}
		if self.allowed_algorithms.is_empty() {
			return Err(Error::Validation {
				field: "allowed_algorithms",
				reason: "At least one algorithm must be allowed.".into(),
			});
		}
		if let Some(alg) = self.allowed_algorithms.iter().find(|alg| !is_asymmetric(**alg)) {
			return Err(Error::Validation {
				field: "allowed_algorithms",
				reason: format!("{alg:?} is not an asymmetric signature algorithm."),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}

		security::check_key_url(&self.jwks_url, self.require_https, &self.allowed_hosts)?;

		self.retry_policy.validate()
	}
}

/// Reconciler settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcilerConfig {
	/// Upper bound on each lookup, insert, and update.
	#[serde(default = "default_persistence_timeout")]
	pub persistence_timeout: Duration,
	/// How new-account hook failures reach the caller.
	#[serde(default)]
	pub hook_policy: HookFailurePolicy,
}
impl Default for ReconcilerConfig {
	fn default() -> Self {
		Self {
			persistence_timeout: DEFAULT_PERSISTENCE_TIMEOUT,
			hook_policy: HookFailurePolicy::default(),
		}
	}
}

/// Whether `alg` belongs to a public-key signature family.
pub fn is_asymmetric(alg: Algorithm) -> bool {
	!matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}

	SMALL_RNG.with(|cell| {
		let nanos = (max.as_nanos() - min.as_nanos()).min(u64::MAX as u128) as u64;
		let jitter = cell.borrow_mut().random_range(0..=nanos);

		min + Duration::from_nanos(jitter)
	})
}

fn default_algorithms() -> Vec<Algorithm> {
	vec![Algorithm::RS256]
}

fn default_true() -> bool {
	true
}

fn default_min_refresh_interval() -> Duration {
	DEFAULT_MIN_REFRESH_INTERVAL
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}

fn default_leeway() -> u64 {
	DEFAULT_LEEWAY_SECS
}

fn default_persistence_timeout() -> Duration {
	DEFAULT_PERSISTENCE_TIMEOUT
}
