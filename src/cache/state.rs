//! Immutable key-set snapshots published by the key cache.

// std
use std::{
	collections::HashMap,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use jsonwebtoken::{
	Algorithm, DecodingKey,
	jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse},
};
// self
use crate::_prelude::*;

/// A provider signing key ready for signature verification.
#[derive(Clone)]
pub struct SigningKey {
	key_id: String,
	algorithm: Option<Algorithm>,
	jwk: Jwk,
	decoding_key: DecodingKey,
}
impl SigningKey {
	/// Build a signing key from a published JWK.
	///
	/// Keys without a `kid`, keys published for encryption, and key types the verification backend
	/// cannot load are rejected.
	pub fn from_jwk(jwk: Jwk) -> Result<Self> {
		let key_id = jwk.common.key_id.clone().ok_or_else(|| Error::Validation {
			field: "kid",
			reason: "Published key has no key identifier.".into(),
		})?;

		if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
			return Err(Error::Validation {
				field: "use",
				reason: format!("Key '{key_id}' is published for encryption, not signing."),
			});
		}

		let algorithm = jwk.common.key_algorithm.as_ref().and_then(signature_algorithm);
		let decoding_key = DecodingKey::from_jwk(&jwk)?;

		Ok(Self { key_id, algorithm, jwk, decoding_key })
	}

	/// Key identifier (`kid`).
	pub fn key_id(&self) -> &str {
		&self.key_id
	}

	/// Algorithm the provider pinned this key to, if it declared one.
	pub fn algorithm(&self) -> Option<Algorithm> {
		self.algorithm
	}

	/// Public key material as published.
	pub fn jwk(&self) -> &Jwk {
		&self.jwk
	}

	/// Verification key handle.
	pub fn decoding_key(&self) -> &DecodingKey {
		&self.decoding_key
	}
}
impl Debug for SigningKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("SigningKey")
			.field("key_id", &self.key_id)
			.field("algorithm", &self.algorithm)
			.finish_non_exhaustive()
	}
}

/// One complete generation of provider keys. Never mutated after publication.
#[derive(Clone, Debug)]
pub struct KeySet {
	keys: HashMap<String, Arc<SigningKey>>,
	etag: Option<String>,
	fetched_at: DateTime<Utc>,
	refreshed_at: Instant,
}
impl KeySet {
	/// Build a snapshot from a fetched JWKS document, skipping unusable keys.
	pub fn from_jwks(jwks: JwkSet, etag: Option<String>) -> Result<Self> {
		let mut keys = HashMap::with_capacity(jwks.keys.len());

		for jwk in jwks.keys {
			match SigningKey::from_jwk(jwk) {
				Ok(key) => {
					keys.insert(key.key_id.clone(), Arc::new(key));
				},
				Err(err) => tracing::warn!(error = %err, "skipping unusable published key"),
			}
		}

		if keys.is_empty() {
			return Err(Error::KeyDiscoveryFailed(
				"Key set contains no usable signing keys.".into(),
			));
		}

		Ok(Self { keys, etag, fetched_at: Utc::now(), refreshed_at: Instant::now() })
	}

	/// Copy of this snapshot stamped as confirmed current by the origin.
	pub fn revalidated(&self) -> Self {
		Self { refreshed_at: Instant::now(), fetched_at: Utc::now(), ..self.clone() }
	}

	/// Look up a key by identifier.
	pub fn get(&self, key_id: &str) -> Option<Arc<SigningKey>> {
		self.keys.get(key_id).cloned()
	}

	/// Identifiers of every key in the snapshot, sorted.
	pub fn key_ids(&self) -> Vec<String> {
		let mut ids: Vec<_> = self.keys.keys().cloned().collect();

		ids.sort_unstable();

		ids
	}

	/// Number of keys in the snapshot.
	pub fn len(&self) -> usize {
		self.keys.len()
	}

	/// Whether the snapshot has no keys.
	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}

	/// Entity tag supplied with the key set.
	pub fn etag(&self) -> Option<&str> {
		self.etag.as_deref()
	}

	/// Wall-clock time the origin last confirmed this key set.
	pub fn fetched_at(&self) -> DateTime<Utc> {
		self.fetched_at
	}

	/// Monotonic time the origin last confirmed this key set.
	pub fn refreshed_at(&self) -> Instant {
		self.refreshed_at
	}
}

fn signature_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
	match alg {
		KeyAlgorithm::RS256 => Some(Algorithm::RS256),
		KeyAlgorithm::RS384 => Some(Algorithm::RS384),
		KeyAlgorithm::RS512 => Some(Algorithm::RS512),
		KeyAlgorithm::PS256 => Some(Algorithm::PS256),
		KeyAlgorithm::PS384 => Some(Algorithm::PS384),
		KeyAlgorithm::PS512 => Some(Algorithm::PS512),
		KeyAlgorithm::ES256 => Some(Algorithm::ES256),
		KeyAlgorithm::ES384 => Some(Algorithm::ES384),
		KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MODULUS: &str = "nbPIrrB2INY_HcwqqOYJSDysfPtb-mvDon9fad4wq2qY4rSLPeTZI_0-tIIIYt7q6dj5mJwMS2nH-gG6wJ3BQGVUOVWl50aBn6mo17heS2sON1LALb98KBwf8cB8G1Z1Bu79fRvW-EnpHdwo_ZIZkmwHZ3pP4opLRN-UHUJdmPI9K88yJXGPAsdfqCunIvYxRaprRg232ncQqh3XPQ68LxrmAistP1cSYTVMWC1B2tr4naajnso6xxg-8xpxrW9bwMNw3fDT5pjlY7PgNxsShAY8G0FDU6acHPGcGNguYPzA9V-5WUo9L5d0Y8heTwlAIsL6J2XW-qKJaICshg9pjw";

	fn jwks(keys: &[(&str, &str)]) -> JwkSet {
		let keys: Vec<_> = keys
			.iter()
			.map(|(kid, use_)| {
				serde_json::json!({
					"kty": "RSA",
					"alg": "RS256",
					"use": use_,
					"kid": kid,
					"n": MODULUS,
					"e": "AQAB",
				})
			})
			.collect();

		serde_json::from_value(serde_json::json!({ "keys": keys })).expect("jwks")
	}

	#[test]
	fn builds_snapshot_and_skips_encryption_keys() {
		let published = jwks(&[("sig-1", "sig"), ("enc-1", "enc")]);
		let set = KeySet::from_jwks(published, Some("\"v1\"".into())).expect("key set");

		assert_eq!(set.key_ids(), vec!["sig-1".to_string()]);
		assert_eq!(set.etag(), Some("\"v1\""));

		let key = set.get("sig-1").expect("signing key");

		assert_eq!(key.algorithm(), Some(Algorithm::RS256));
		assert!(set.get("enc-1").is_none());
	}

	#[test]
	fn empty_key_set_is_a_discovery_failure() {
		let err = KeySet::from_jwks(JwkSet { keys: Vec::new() }, None).unwrap_err();

		assert!(matches!(err, Error::KeyDiscoveryFailed(_)));
	}

	#[test]
	fn revalidation_keeps_keys() {
		let set = KeySet::from_jwks(jwks(&[("sig-1", "sig")]), None).expect("key set");
		let revalidated = set.revalidated();

		assert_eq!(revalidated.key_ids(), set.key_ids());
		assert!(revalidated.refreshed_at() >= set.refreshed_at());
	}
}
