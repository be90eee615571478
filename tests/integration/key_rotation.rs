//! Key cache behaviour under rotation, concurrency, and provider outages.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use http::StatusCode;
use signin_reconcile::{
	AuthRequest, ErrorKind, HookRegistry, KeyCache, MemoryUserStore, ProviderConfig,
	TokenVerifier,
};
use wiremock::{
	Mock, MockServer, Request, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::common::*;

#[tokio::test]
async fn rotated_key_is_fetched_right_after_previous_fetch() {
	init_tracing();

	let server = MockServer::start().await;
	let requests = Arc::new(AtomicUsize::new(0));
	let counter = requests.clone();

	Mock::given(method("GET"))
		.and(path(KEYS_PATH))
		.respond_with(move |_: &Request| match counter.fetch_add(1, Ordering::SeqCst) {
			0 => jwks_response(&[("primary", PRIMARY_MODULUS)]),
			_ => jwks_response(&[("primary", PRIMARY_MODULUS), ("rotated", ROTATED_MODULUS)]),
		})
		.mount(&server)
		.await;

	let verifier = TokenVerifier::from_config(provider(&server)).expect("verifier");
	let old = sign("primary", PRIMARY_PEM, &claims("001.amy", BUNDLE_AUDIENCE));
	let new = sign("rotated", ROTATED_PEM, &claims("001.amy", BUNDLE_AUDIENCE));

	verifier.verify(&old).await.expect("primary key");
	verifier.verify(&old).await.expect("cached primary key");

	assert_eq!(requests.load(Ordering::SeqCst), 1);

	let claims = verifier.verify(&new).await.expect("rotated key");

	assert_eq!(claims.subject, "001.amy");
	assert_eq!(requests.load(Ordering::SeqCst), 2);

	let status = verifier.key_cache().status().await;

	assert_eq!(status.key_ids, vec!["primary".to_string(), "rotated".to_string()]);
	assert_eq!(status.metrics.refreshes, 2);
	assert_eq!(status.metrics.hits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_share_one_fetch() {
	let server = MockServer::start().await;

	mount_keys(
		&server,
		jwks_response(&[("primary", PRIMARY_MODULUS)]).set_delay(Duration::from_millis(200)),
		1,
	)
	.await;

	let verifier = TokenVerifier::from_config(provider(&server)).expect("verifier");
	let token = sign("primary", PRIMARY_PEM, &claims("001.amy", BUNDLE_AUDIENCE));
	let tasks: Vec<_> = (0..8)
		.map(|_| {
			let verifier = verifier.clone();
			let token = token.clone();

			tokio::spawn(async move { verifier.verify(&token).await })
		})
		.collect();

	for task in tasks {
		task.await.expect("join").expect("verify");
	}

	let metrics = verifier.key_cache().status().await.metrics;

	assert_eq!(metrics.refreshes, 1);
	assert_eq!(metrics.coalesced + metrics.hits, 7);

	server.verify().await;
}

#[tokio::test]
async fn forged_key_ids_are_rate_limited() {
	let server = MockServer::start().await;

	mount_keys(&server, jwks_response(&[("primary", PRIMARY_MODULUS)]), 1).await;

	let config = provider(&server).with_min_refresh_interval(Duration::from_secs(60));
	let verifier = TokenVerifier::from_config(config).expect("verifier");

	verifier
		.verify(&sign("primary", PRIMARY_PEM, &claims("001.amy", BUNDLE_AUDIENCE)))
		.await
		.expect("primary key");

	for attempt in 0..5 {
		let kid = format!("forged-{attempt}");
		let forged = sign(&kid, ROTATED_PEM, &claims("001.amy", BUNDLE_AUDIENCE));
		let err = verifier.verify(&forged).await.unwrap_err();

		assert_eq!(err.kind(), ErrorKind::KeyDiscoveryFailed, "{err:?}");
	}

	server.verify().await;
}

#[tokio::test]
async fn unreachable_provider_is_an_authentication_failure() {
	let server = MockServer::start().await;
	let mut config = provider(&server);

	// Nothing listens on the discard port.
	config.jwks_url = "http://127.0.0.1:9/auth/keys".parse().expect("url");

	let store = Arc::new(MemoryUserStore::new());
	let auth = authenticator(config, store.clone(), HookRegistry::empty());
	let token = sign("primary", PRIMARY_PEM, &claims("001.amy", BUNDLE_AUDIENCE));
	let request =
		AuthRequest { identity_token: token, name: None, birth_date: None, top_goals: Vec::new() };
	let err = auth.authenticate(request.clone()).await.unwrap_err();

	assert_eq!(err.kind(), ErrorKind::KeyDiscoveryFailed, "{err:?}");

	let (status, _) = auth.handle(request).await;

	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert!(store.is_empty().await);
}

#[tokio::test]
async fn provider_errors_surface_as_key_discovery_failures() {
	let server = MockServer::start().await;

	mount_keys(&server, ResponseTemplate::new(503), 1).await;

	let verifier = TokenVerifier::from_config(provider(&server)).expect("verifier");
	let token = sign("primary", PRIMARY_PEM, &claims("001.amy", BUNDLE_AUDIENCE));
	let err = verifier.verify(&token).await.unwrap_err();

	assert_eq!(err.kind(), ErrorKind::KeyDiscoveryFailed, "{err:?}");
	assert_eq!(verifier.key_cache().status().await.metrics.refresh_errors, 1);
}

#[tokio::test]
async fn explicit_refresh_revalidates_with_etag() {
	let server = MockServer::start().await;
	let requests = Arc::new(AtomicUsize::new(0));
	let counter = requests.clone();

	Mock::given(method("GET"))
		.and(path(KEYS_PATH))
		.respond_with(move |request: &Request| match counter.fetch_add(1, Ordering::SeqCst) {
			0 => jwks_response(&[("primary", PRIMARY_MODULUS)]).insert_header("etag", "\"v1\""),
			_ => {
				assert_eq!(
					request.headers.get("if-none-match").and_then(|value| value.to_str().ok()),
					Some("\"v1\""),
				);

				ResponseTemplate::new(304)
			},
		})
		.mount(&server)
		.await;

	let cache = KeyCache::new(provider(&server)).expect("cache");
	let first = cache.refresh().await.expect("initial fetch");
	let second = cache.refresh().await.expect("revalidation");

	assert_eq!(second.key_ids(), first.key_ids());
	assert_eq!(second.etag(), Some("\"v1\""));
	assert!(second.refreshed_at() >= first.refreshed_at());
	assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn oversized_key_sets_are_refused() {
	let server = MockServer::start().await;

	mount_keys(&server, jwks_response(&[("primary", PRIMARY_MODULUS)]), 1).await;

	let mut config: ProviderConfig = provider(&server);

	config.max_response_bytes = 64;

	let cache = KeyCache::new(config).expect("cache");
	let err = cache.refresh().await.unwrap_err();

	assert_eq!(err.kind(), ErrorKind::KeyDiscoveryFailed, "{err:?}");
	assert!(cache.current().await.is_none());
}
