//! Full sign-in pipeline: token verification, reconciliation, hooks, and response mapping.

// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use chrono::{TimeZone, Utc};
use http::StatusCode;
use signin_reconcile::{
	AuthReply, AuthRequest, Error, ErrorKind, HookRegistry, MemoryUserStore, UserStore, hook_fn,
};
use wiremock::MockServer;
// self
use crate::common::*;

fn request(token: String) -> AuthRequest {
	AuthRequest { identity_token: token, name: None, birth_date: None, top_goals: Vec::new() }
}

#[tokio::test]
async fn first_sign_in_creates_and_second_finds() {
	init_tracing();

	let server = MockServer::start().await;

	mount_keys(&server, jwks_response(&[("primary", PRIMARY_MODULUS)]), 1).await;

	let store = Arc::new(MemoryUserStore::new());
	let fired = Arc::new(AtomicUsize::new(0));
	let counter = fired.clone();
	let hooks = HookRegistry::builder()
		.register(hook_fn("welcome", move |_| {
			let counter = counter.clone();

			async move {
				counter.fetch_add(1, Ordering::SeqCst);

				Ok(())
			}
		}))
		.build();
	let auth = authenticator(provider(&server), store.clone(), hooks);
	let token = sign("primary", PRIMARY_PEM, &claims("001.bob", BUNDLE_AUDIENCE));
	let birthday = Utc.with_ymd_and_hms(1985, 3, 22, 0, 0, 0).unwrap();
	let first = auth
		.authenticate(AuthRequest {
			identity_token: token.clone(),
			name: Some("Bob".into()),
			birth_date: Some(birthday),
			top_goals: vec!["sleep".into()],
		})
		.await
		.expect("first sign-in");

	assert!(first.is_new_account);
	assert_eq!(first.subject_id, "001.bob");
	assert_eq!(first.name.as_deref(), Some("Bob"));
	assert_eq!(first.email.as_deref(), Some("001.bob@privaterelay.appleid.com"));

	let second = auth.authenticate(request(token)).await.expect("second sign-in");

	assert!(!second.is_new_account);
	assert_eq!(second.name.as_deref(), Some("Bob"));
	assert_eq!(fired.load(Ordering::SeqCst), 1);

	let stored = store.find_one("001.bob").await.expect("find").expect("profile");

	assert_eq!(stored.identity.expect("identity").birthday, birthday);
	assert_eq!(stored.preferences.top_goals, vec!["sleep".to_string()]);
	assert_eq!(store.writes(), 1);

	server.verify().await;
}

#[tokio::test]
async fn both_allow_listed_audiences_are_accepted() {
	let server = MockServer::start().await;

	mount_keys(&server, jwks_response(&[("primary", PRIMARY_MODULUS)]), 1).await;

	let auth = authenticator(
		provider(&server),
		Arc::new(MemoryUserStore::new()),
		HookRegistry::empty(),
	);

	for (subject, audience) in [("001.app", BUNDLE_AUDIENCE), ("001.web", WEB_AUDIENCE)] {
		let token = sign("primary", PRIMARY_PEM, &claims(subject, audience));
		let (status, reply) = auth.handle(request(token)).await;

		assert_eq!(status, StatusCode::OK, "audience {audience} rejected: {reply:?}");
	}
}

#[tokio::test]
async fn rejected_tokens_map_to_unauthorized() {
	let server = MockServer::start().await;

	mount_keys(&server, jwks_response(&[("primary", PRIMARY_MODULUS)]), 1).await;

	let store = Arc::new(MemoryUserStore::new());
	let auth = authenticator(provider(&server), store.clone(), HookRegistry::empty());
	let mut expired = claims("001.amy", BUNDLE_AUDIENCE);

	expired["exp"] = (Utc::now().timestamp() - 3_600).into();

	let mut foreign_issuer = claims("001.amy", BUNDLE_AUDIENCE);

	foreign_issuer["iss"] = "https://accounts.example.com".into();

	let cases = [
		("foreign audience", sign("primary", PRIMARY_PEM, &claims("001.amy", "com.other.app"))),
		("expired", sign("primary", PRIMARY_PEM, &expired)),
		("foreign issuer", sign("primary", PRIMARY_PEM, &foreign_issuer)),
		("forged signature", sign("primary", ROTATED_PEM, &claims("001.amy", BUNDLE_AUDIENCE))),
	];

	for (case, token) in cases {
		let err = auth.authenticate(request(token.clone())).await.unwrap_err();

		assert_eq!(err.kind(), ErrorKind::TokenInvalid, "{case}: {err:?}");

		let (status, reply) = auth.handle(request(token)).await;

		assert_eq!(status, StatusCode::UNAUTHORIZED, "{case}");
		assert!(matches!(reply, AuthReply::Rejected { .. }), "{case}");
	}

	assert!(store.is_empty().await);
}

#[tokio::test]
async fn hook_failure_is_a_server_error_and_retry_sees_existing_account() {
	let server = MockServer::start().await;

	mount_keys(&server, jwks_response(&[("primary", PRIMARY_MODULUS)]), 1).await;

	let store = Arc::new(MemoryUserStore::new());
	let hooks = HookRegistry::builder()
		.register(hook_fn("provision", |_| async {
			Err(Error::PersistenceUnavailable("wallet service down".into()))
		}))
		.build();
	let auth = authenticator(provider(&server), store.clone(), hooks);
	let token = sign("primary", PRIMARY_PEM, &claims("001.amy", BUNDLE_AUDIENCE));
	let (status, reply) = auth.handle(request(token.clone())).await;

	assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

	let AuthReply::Rejected { detail } = reply else { panic!("expected rejection") };

	assert!(!detail.contains("wallet"));

	let retry = auth.authenticate(request(token)).await.expect("retry");

	assert!(!retry.is_new_account);
	assert_eq!(store.len().await, 1);
}
