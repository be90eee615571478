//! Shared fixtures: RSA signing keys, a mock JWKS endpoint, and token minting.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use signin_reconcile::{
	AudienceConfig, Authenticator, HookRegistry, MemoryUserStore, ProviderConfig, Reconciler,
	RetryPolicy, TokenVerifier, config::APPLE_ISSUER,
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

pub const BUNDLE_AUDIENCE: &str = "com.example.app";
pub const WEB_AUDIENCE: &str = "com.example.web";
pub const KEYS_PATH: &str = "/auth/keys";

pub const PRIMARY_PEM: &str = include_str!("../fixtures/primary.pem");
pub const ROTATED_PEM: &str = include_str!("../fixtures/rotated.pem");
pub const PRIMARY_MODULUS: &str = "nbPIrrB2INY_HcwqqOYJSDysfPtb-mvDon9fad4wq2qY4rSLPeTZI_0-tIIIYt7q6dj5mJwMS2nH-gG6wJ3BQGVUOVWl50aBn6mo17heS2sON1LALb98KBwf8cB8G1Z1Bu79fRvW-EnpHdwo_ZIZkmwHZ3pP4opLRN-UHUJdmPI9K88yJXGPAsdfqCunIvYxRaprRg232ncQqh3XPQ68LxrmAistP1cSYTVMWC1B2tr4naajnso6xxg-8xpxrW9bwMNw3fDT5pjlY7PgNxsShAY8G0FDU6acHPGcGNguYPzA9V-5WUo9L5d0Y8heTwlAIsL6J2XW-qKJaICshg9pjw";
pub const ROTATED_MODULUS: &str = "ux_YFwGQwzNlydP7gQje5Z7jNekZ_HnkhMvqBsQ2-4s-V2wiLriCXQob_tqCWp32FSVSNDWwg9JCsWVU7qTHYahTm5Vpf1-OiduLcEtoEv2k_acxyNZABl9v7iZhriVjAf2pidbFBowVJYZatE92ilCw07PVJq-upUTA8Nb-CWgGJmjhJ-M90FSqv3C4M0t0jX2PNKN0f5UPiMFbMIEhJglS-pjgurLTbj2P1K_Nmouso59NHx3KePOBWePDzzHA9fbaG_8SAKdgeF7oTbs6zOZihDdgoUlYoXqYeWlNCVd1a6LS4mNJMcWHR0fTShamRtLm7DclvO7_5XRP-TDirw";

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// JWKS document publishing `(kid, modulus)` pairs as RS256 signing keys.
pub fn jwks(keys: &[(&str, &str)]) -> Value {
	let keys: Vec<_> = keys
		.iter()
		.map(|(kid, modulus)| {
			json!({
				"kty": "RSA",
				"alg": "RS256",
				"use": "sig",
				"kid": kid,
				"n": modulus,
				"e": "AQAB",
			})
		})
		.collect();

	json!({ "keys": keys })
}

pub fn jwks_response(keys: &[(&str, &str)]) -> ResponseTemplate {
	ResponseTemplate::new(200).set_body_json(jwks(keys))
}

/// Serve `template` on the key path, expecting exactly `expected` requests.
pub async fn mount_keys(server: &MockServer, template: ResponseTemplate, expected: u64) {
	Mock::given(method("GET"))
		.and(path(KEYS_PATH))
		.respond_with(template)
		.expect(expected)
		.mount(server)
		.await;
}

/// Apple-shaped claims for `subject`, valid for ten minutes.
pub fn claims(subject: &str, audience: &str) -> Value {
	let now = Utc::now().timestamp();

	json!({
		"iss": APPLE_ISSUER,
		"aud": audience,
		"sub": subject,
		"iat": now,
		"exp": now + 600,
		"email": format!("{subject}@privaterelay.appleid.com"),
	})
}

pub fn sign(kid: &str, pem: &str, claims: &Value) -> String {
	let mut header = Header::new(Algorithm::RS256);

	header.kid = Some(kid.into());

	let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("signing key");

	encode(&header, claims, &key).expect("token")
}

/// Provider settings pointing at the mock server with fast retries.
pub fn provider(server: &MockServer) -> ProviderConfig {
	let audiences = AudienceConfig::new(BUNDLE_AUDIENCE, WEB_AUDIENCE);
	let url = format!("{}{KEYS_PATH}", server.uri());
	let mut config = ProviderConfig::new("apple", APPLE_ISSUER, url, audiences)
		.expect("provider config")
		.with_require_https(false);

	config.retry_policy = fast_retries();

	config
}

pub fn fast_retries() -> RetryPolicy {
	RetryPolicy {
		max_retries: 0,
		attempt_timeout: Duration::from_millis(500),
		initial_backoff: Duration::from_millis(10),
		max_backoff: Duration::from_millis(10),
		deadline: Duration::from_millis(500),
		..Default::default()
	}
}

pub fn authenticator(
	config: ProviderConfig,
	store: Arc<MemoryUserStore>,
	hooks: HookRegistry,
) -> Authenticator {
	let verifier = TokenVerifier::from_config(config).expect("verifier");

	Authenticator::new(verifier, Reconciler::new(store, hooks))
}
