//! Key cache manager handling key-set retrieval and refresh coalescing.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use reqwest::Client;
use tokio::{
	sync::{Mutex, RwLock},
	time,
};
// self
use crate::{
	_prelude::*,
	cache::state::{KeySet, SigningKey},
	config::ProviderConfig,
	http::{
		client::{KeySetFetch, build_client, fetch_key_set},
		retry::{AttemptBudget, RetryExecutor},
	},
	metrics::{self, KeyCacheMetrics, KeyCacheMetricsSnapshot},
};

/// Caches a provider's signing keys and refreshes them reactively on unknown key ids.
///
/// The published key set is an immutable [`KeySet`] swapped in whole, so readers always see one
/// complete generation. Refreshes run under a single-flight guard: tasks that queue behind an
/// in-flight fetch reuse its outcome instead of issuing their own.
#[derive(Clone, Debug)]
pub struct KeyCache {
	config: Arc<ProviderConfig>,
	client: Arc<Client>,
	snapshot: Arc<RwLock<Option<Arc<KeySet>>>>,
	single_flight: Arc<Mutex<FlightRecord>>,
	completed_fetches: Arc<AtomicU64>,
	metrics: Arc<KeyCacheMetrics>,
}
impl KeyCache {
	/// Build a key cache with the default HTTP client.
	pub fn new(config: ProviderConfig) -> Result<Self> {
		config.validate()?;

		let client = build_client(&config)?;

		Ok(Self::with_parts(config, client))
	}

	/// Build a key cache around the supplied HTTP client.
	pub fn with_client(config: ProviderConfig, client: Client) -> Result<Self> {
		config.validate()?;

		Ok(Self::with_parts(config, client))
	}

	fn with_parts(config: ProviderConfig, client: Client) -> Self {
		Self {
			config: Arc::new(config),
			client: Arc::new(client),
			snapshot: Arc::new(RwLock::new(None)),
			single_flight: Arc::new(Mutex::new(FlightRecord::default())),
			completed_fetches: Arc::new(AtomicU64::new(0)),
			metrics: KeyCacheMetrics::new(),
		}
	}

	/// Provider configuration backing this cache.
	pub fn config(&self) -> &ProviderConfig {
		&self.config
	}

	/// Look up a key in the current snapshot without touching the network.
	pub async fn get(&self, key_id: &str) -> Option<Arc<SigningKey>> {
		self.current().await.and_then(|set| set.get(key_id))
	}

	/// Currently published key set, if any fetch has succeeded.
	pub async fn current(&self) -> Option<Arc<KeySet>> {
		self.snapshot.read().await.clone()
	}

	/// Resolve a key by identifier, refreshing the key set once on a miss.
	#[tracing::instrument(skip(self), fields(provider = %self.config.provider_id))]
	pub async fn resolve(&self, key_id: &str) -> Result<Arc<SigningKey>> {
		// Read the generation first so a fetch completing after our miss is not mistaken for ours.
		let observed = self.completed_fetches.load(Ordering::Acquire);

		if let Some(key) = self.get(key_id).await {
			self.observe_lookup(true);

			return Ok(key);
		}

		self.observe_lookup(false);
		tracing::debug!("unknown key id; refreshing key set");

		let set = self.refresh_after(observed, true).await?;

		set.get(key_id).ok_or_else(|| {
			Error::KeyDiscoveryFailed(format!(
				"Key id '{key_id}' is not published by provider '{}'.",
				self.config.provider_id
			))
		})
	}

	/// Re-fetch the whole key set and publish it atomically.
	///
	/// Concurrent callers share one fetch.
	pub async fn refresh(&self) -> Result<Arc<KeySet>> {
		let observed = self.completed_fetches.load(Ordering::Acquire);

		self.refresh_after(observed, false).await
	}

	/// Status projection for diagnostics.
	pub async fn status(&self) -> KeyCacheStatus {
		let current = self.current().await;

		KeyCacheStatus {
			provider_id: self.config.provider_id.clone(),
			key_ids: current.as_ref().map(|set| set.key_ids()).unwrap_or_default(),
			last_refresh: current.as_ref().map(|set| set.fetched_at()),
			metrics: self.metrics.snapshot(),
		}
	}

	#[tracing::instrument(skip(self), fields(provider = %self.config.provider_id))]
	async fn refresh_after(&self, observed: u64, respect_interval: bool) -> Result<Arc<KeySet>> {
		let mut flight = self.single_flight.lock().await;

		if flight.completed != observed {
			self.metrics.record_coalesced();
			tracing::debug!("reusing result of a concurrent key set fetch");

			return match &flight.last_error {
				Some(reason) => Err(Error::KeyDiscoveryFailed(reason.clone())),
				None => self.current().await.ok_or_else(|| {
					Error::KeyDiscoveryFailed("Key set unavailable after refresh.".into())
				}),
			};
		}

		let previous = self.current().await;

		if respect_interval
			&& let Some(set) = &previous
			&& set.refreshed_at().elapsed() < self.config.min_refresh_interval
		{
			tracing::debug!("key set refreshed recently; skipping fetch");

			return Ok(set.clone());
		}

		let started = Instant::now();
		let outcome = self.fetch(previous.as_deref()).await;

		flight.completed += 1;

		match outcome {
			Ok(set) => {
				*self.snapshot.write().await = Some(set.clone());
				flight.last_error = None;
				self.completed_fetches.store(flight.completed, Ordering::Release);
				self.observe_refresh_success(started.elapsed());

				tracing::debug!(keys = set.len(), "published key set");

				Ok(set)
			},
			Err(err) => {
				flight.last_error = Some(err.to_string());
				self.completed_fetches.store(flight.completed, Ordering::Release);
				self.observe_refresh_error();

				tracing::warn!(error = %err, "key set refresh failed");

				Err(err)
			},
		}
	}

	async fn fetch(&self, previous: Option<&KeySet>) -> Result<Arc<KeySet>> {
		let mut executor = RetryExecutor::new(&self.config.retry_policy);
		let mut last_error = None;
		let etag = previous.and_then(KeySet::etag);

		while let AttemptBudget::Granted { timeout } = executor.attempt_budget() {
			match fetch_key_set(&self.client, &self.config, etag, timeout).await {
				Ok(KeySetFetch::Modified { jwks, etag }) =>
					return KeySet::from_jwks(jwks, etag).map(Arc::new),
				Ok(KeySetFetch::NotModified) => match previous {
					Some(set) => return Ok(Arc::new(set.revalidated())),
					None =>
						last_error = Some(Error::KeyDiscoveryFailed(
							"Received 304 status without a cached key set.".into(),
						)),
				},
				Err(err) => last_error = Some(err),
			}

			match executor.next_backoff() {
				Some(delay) if !delay.is_zero() => time::sleep(delay).await,
				Some(_) => {},
				None => break,
			}
		}

		let err = last_error.unwrap_or_else(|| {
			Error::KeyDiscoveryFailed("Key discovery deadline exhausted.".into())
		});

		Err(err.into_key_discovery())
	}

	fn observe_lookup(&self, hit: bool) {
		metrics::record_key_lookup(&self.config.provider_id, hit);

		self.metrics.record_lookup(hit);
	}

	fn observe_refresh_success(&self, duration: Duration) {
		metrics::record_key_refresh_success(&self.config.provider_id, duration);

		self.metrics.record_refresh_success(duration);
	}

	fn observe_refresh_error(&self) {
		metrics::record_key_refresh_error(&self.config.provider_id);

		self.metrics.record_refresh_error();
	}
}

/// Diagnostic view of a key cache.
#[derive(Clone, Debug)]
pub struct KeyCacheStatus {
	/// Provider label.
	pub provider_id: String,
	/// Key identifiers in the published snapshot.
	pub key_ids: Vec<String>,
	/// When the origin last confirmed the snapshot.
	pub last_refresh: Option<DateTime<Utc>>,
	/// Lookup and refresh counters.
	pub metrics: KeyCacheMetricsSnapshot,
}

#[derive(Debug, Default)]
struct FlightRecord {
	completed: u64,
	last_error: Option<String>,
}
