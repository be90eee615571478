//! Identity-token verification against the provider's published signing keys.

// crates.io
use jsonwebtoken::{Validation, decode, decode_header};
use serde::Deserialize;
// self
use crate::{_prelude::*, cache::KeyCache, config::ProviderConfig};

/// Claims extracted from a token whose signature, expiry, issuer, and audience all checked out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedClaims {
	/// Provider-assigned stable subject identifier.
	pub subject: String,
	/// Email claim, when the provider supplied one.
	pub email: Option<String>,
	/// Issuer the token was minted by.
	pub issuer: String,
	/// Audiences the token was minted for.
	pub audience: Vec<String>,
	/// Expiry instant.
	pub expires_at: DateTime<Utc>,
}

/// Verifies provider identity tokens.
#[derive(Clone, Debug)]
pub struct TokenVerifier {
	keys: KeyCache,
}
impl TokenVerifier {
	/// Build a verifier over an existing key cache.
	pub fn new(keys: KeyCache) -> Self {
		Self { keys }
	}

	/// Build a verifier and its key cache from provider configuration.
	pub fn from_config(config: ProviderConfig) -> Result<Self> {
		Ok(Self::new(KeyCache::new(config)?))
	}

	/// Key cache backing this verifier.
	pub fn key_cache(&self) -> &KeyCache {
		&self.keys
	}

	/// Verify `token` and return its claims.
	///
	/// Fails with [`Error::TokenInvalid`] for anything the token itself gets wrong and with
	/// [`Error::KeyDiscoveryFailed`] when the signing key cannot be obtained.
	#[tracing::instrument(skip_all, fields(provider = %self.keys.config().provider_id))]
	pub async fn verify(&self, token: &str) -> Result<VerifiedClaims> {
		let config = self.keys.config();
		// `alg: none` fails to parse here; `Algorithm` has no such variant.
		let header = decode_header(token)
			.map_err(|err| Error::TokenInvalid(format!("Malformed token header: {err}.")))?;

		if !config.allowed_algorithms.contains(&header.alg) {
			return Err(Error::TokenInvalid(format!(
				"Algorithm {:?} is not accepted.",
				header.alg
			)));
		}

		let key_id = header
			.kid
			.as_deref()
			.ok_or_else(|| Error::TokenInvalid("Token header has no key id.".into()))?;
		let key = self.keys.resolve(key_id).await?;

		if let Some(pinned) = key.algorithm()
			&& pinned != header.alg
		{
			return Err(Error::TokenInvalid(format!(
				"Key '{key_id}' is pinned to {pinned:?} but the token declares {:?}.",
				header.alg
			)));
		}

		let mut validation = Validation::new(header.alg);

		validation.set_issuer(&[config.issuer.as_str()]);
		validation.set_audience(&config.audiences.values());
		validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
		validation.leeway = config.leeway;

		let claims = decode::<TokenClaims>(token, key.decoding_key(), &validation)
			.map_err(|err| Error::TokenInvalid(format!("Token failed validation: {err}.")))?
			.claims;
		let audience = claims.aud.into_vec();

		if claims.iss != config.issuer
			|| !config.audiences.accepts(audience.iter().map(String::as_str))
		{
			return Err(Error::TokenInvalid("Issuer or audience is not accepted.".into()));
		}
		if claims.sub.trim().is_empty() {
			return Err(Error::TokenInvalid("Subject claim is empty.".into()));
		}

		let expires_at = DateTime::from_timestamp(claims.exp, 0)
			.ok_or_else(|| Error::TokenInvalid("Expiry claim is out of range.".into()))?;

		tracing::debug!(key_id, "identity token verified");

		Ok(VerifiedClaims {
			subject: claims.sub,
			email: claims.email.filter(|email| !email.trim().is_empty()),
			issuer: claims.iss,
			audience,
			expires_at,
		})
	}
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
	sub: String,
	iss: String,
	aud: OneOrMany,
	exp: i64,
	#[serde(default)]
	email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
	One(String),
	Many(Vec<String>),
}
impl OneOrMany {
	fn into_vec(self) -> Vec<String> {
		match self {
			Self::One(value) => vec![value],
			Self::Many(values) => values,
		}
	}
}
