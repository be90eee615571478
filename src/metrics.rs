//! Metrics helpers and key-cache telemetry bookkeeping.
//!
//! Global series are emitted through the `metrics` facade when the `metrics` feature is enabled;
//! [`KeyCacheMetrics`] is always available and backs [`crate::cache::KeyCache::status`].

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
#[cfg(feature = "metrics")] use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")] use smallvec::SmallVec;
// self
use crate::_prelude::*;

#[cfg(feature = "metrics")]
type LabelSet = SmallVec<[Label; 4]>;

const METRIC_KEY_LOOKUPS_TOTAL: &str = "signin_key_lookups_total";
const METRIC_KEY_REFRESH_TOTAL: &str = "signin_key_refresh_total";
const METRIC_KEY_REFRESH_DURATION: &str = "signin_key_refresh_duration_seconds";
const METRIC_RECONCILE_TOTAL: &str = "signin_reconcile_total";
const METRIC_HOOK_FAILURES_TOTAL: &str = "signin_hook_failures_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Lock-free counters for a single key cache.
#[derive(Debug, Default)]
pub struct KeyCacheMetrics {
	lookups: AtomicU64,
	hits: AtomicU64,
	refreshes: AtomicU64,
	refresh_errors: AtomicU64,
	coalesced: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl KeyCacheMetrics {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a key lookup and whether it was served from the cached snapshot.
	pub fn record_lookup(&self, hit: bool) {
		self.lookups.fetch_add(1, Ordering::Relaxed);

		if hit {
			self.hits.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Record a completed fetch and its latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refreshes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record a failed fetch.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a refresh request that reused another task's in-flight fetch.
	pub fn record_coalesced(&self) {
		self.coalesced.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot.
	pub fn snapshot(&self) -> KeyCacheMetricsSnapshot {
		KeyCacheMetricsSnapshot {
			lookups: self.lookups.load(Ordering::Relaxed),
			hits: self.hits.load(Ordering::Relaxed),
			refreshes: self.refreshes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			coalesced: self.coalesced.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only view of [`KeyCacheMetrics`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCacheMetricsSnapshot {
	/// Total key lookups.
	pub lookups: u64,
	/// Lookups answered from the cached snapshot.
	pub hits: u64,
	/// Successful key-set fetches.
	pub refreshes: u64,
	/// Failed key-set fetches.
	pub refresh_errors: u64,
	/// Refresh requests satisfied by a concurrent fetch.
	pub coalesced: u64,
	/// Latency of the most recent successful fetch.
	pub last_refresh_micros: Option<u64>,
}
impl KeyCacheMetricsSnapshot {
	/// Ratio of cache hits to lookups.
	pub fn hit_rate(&self) -> f64 {
		if self.lookups == 0 { 0.0 } else { self.hits as f64 / self.lookups as f64 }
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new().install_recorder().map_err(|err| Error::Validation {
		field: "metrics_exporter",
		reason: err.to_string(),
	})?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a signing-key lookup.
pub fn record_key_lookup(provider: &str, hit: bool) {
	#[cfg(feature = "metrics")]
	{
		let result = if hit { "hit" } else { "miss" };

		metrics::counter!(METRIC_KEY_LOOKUPS_TOTAL, labels(provider, "result", result).iter())
			.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = (provider, hit, METRIC_KEY_LOOKUPS_TOTAL);
}

/// Record a successful key-set fetch along with its latency.
pub fn record_key_refresh_success(provider: &str, duration: Duration) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(METRIC_KEY_REFRESH_TOTAL, labels(provider, "status", "success").iter())
			.increment(1);
		metrics::histogram!(METRIC_KEY_REFRESH_DURATION, base_labels(provider).iter())
			.record(duration.as_secs_f64());
	}
	#[cfg(not(feature = "metrics"))]
	let _ = (provider, duration, METRIC_KEY_REFRESH_TOTAL, METRIC_KEY_REFRESH_DURATION);
}

/// Record a failed key-set fetch.
pub fn record_key_refresh_error(provider: &str) {
	#[cfg(feature = "metrics")]
	metrics::counter!(METRIC_KEY_REFRESH_TOTAL, labels(provider, "status", "error").iter())
		.increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = provider;
}

/// Record the outcome of a reconciliation (`created`, `updated`, `unchanged`, `race_recovered`).
pub fn record_reconcile(outcome: &'static str) {
	#[cfg(feature = "metrics")]
	metrics::counter!(METRIC_RECONCILE_TOTAL, "outcome" => outcome).increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = (outcome, METRIC_RECONCILE_TOTAL);
}

/// Record a failed new-account hook.
pub fn record_hook_failure(hook: &str) {
	#[cfg(feature = "metrics")]
	metrics::counter!(METRIC_HOOK_FAILURES_TOTAL, "hook" => hook.to_owned()).increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = (hook, METRIC_HOOK_FAILURES_TOTAL);
}

#[cfg(feature = "metrics")]
fn base_labels(provider: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("provider", provider.to_owned()));

	labels
}

#[cfg(feature = "metrics")]
fn labels(provider: &str, key: &'static str, value: &'static str) -> LabelSet {
	let mut labels = base_labels(provider);

	labels.push(Label::new(key, value));

	labels
}
