//! Authentication endpoint: verify, reconcile, and translate failures into transport responses.

// crates.io
use http::StatusCode;
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	error::ErrorKind,
	reconcile::{ReconcileInput, Reconciler},
	verifier::TokenVerifier,
};

const REJECTED: &str = "Invalid or expired identity token.";
const SERVER_FAILURE: &str = "Authentication failed due to a server error.";

/// Sign-in request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
	/// Provider-issued identity token.
	pub identity_token: String,
	/// Display name, supplied by the client on first sign-in only.
	#[serde(default)]
	pub name: Option<String>,
	/// Birth date.
	#[serde(default, alias = "birthday")]
	pub birth_date: Option<DateTime<Utc>>,
	/// Onboarding goals.
	#[serde(default)]
	pub top_goals: Vec<String>,
}

/// Sign-in success body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
	/// Verified subject identifier.
	pub subject_id: String,
	/// Whether this sign-in created the account.
	pub is_new_account: bool,
	/// Stored display name, or the supplied one when none is stored.
	pub name: Option<String>,
	/// Stored email.
	pub email: Option<String>,
}

/// Body returned to the caller, success or failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthReply {
	/// Successful sign-in.
	Authenticated(AuthResponse),
	/// Failure with a caller-safe message.
	Rejected {
		/// Generic description; never carries internal error text.
		detail: String,
	},
}

/// Orchestrates token verification and profile reconciliation for one request.
#[derive(Clone, Debug)]
pub struct Authenticator {
	verifier: TokenVerifier,
	reconciler: Reconciler,
}
impl Authenticator {
	/// Wire a verifier and a reconciler together.
	pub fn new(verifier: TokenVerifier, reconciler: Reconciler) -> Self {
		Self { verifier, reconciler }
	}

	/// Token verifier.
	pub fn verifier(&self) -> &TokenVerifier {
		&self.verifier
	}

	/// Profile reconciler.
	pub fn reconciler(&self) -> &Reconciler {
		&self.reconciler
	}

	/// Run the sign-in pipeline, returning typed errors.
	pub async fn authenticate(&self, request: AuthRequest) -> Result<AuthResponse> {
		let AuthRequest { identity_token, name, birth_date, top_goals } = request;
		let claims = self.verifier.verify(&identity_token).await?;
		let input = ReconcileInput::from_claims(claims, name, birth_date, top_goals);
		let supplied_name = input.name.clone();
		let outcome = self.reconciler.reconcile(input).await?;
		let profile = outcome.profile;

		Ok(AuthResponse {
			name: profile.name().map(ToOwned::to_owned).or(supplied_name),
			email: profile.account.email.clone(),
			subject_id: profile.id,
			is_new_account: outcome.is_new_account,
		})
	}

	/// Run the sign-in pipeline and map the outcome onto a status code and body.
	///
	/// Internal error detail is logged, never returned.
	pub async fn handle(&self, request: AuthRequest) -> (StatusCode, AuthReply) {
		match self.authenticate(request).await {
			Ok(response) => (StatusCode::OK, AuthReply::Authenticated(response)),
			Err(err) => reject(&err),
		}
	}
}

/// Translate a pipeline error into a caller-safe response.
pub fn reject(err: &Error) -> (StatusCode, AuthReply) {
	let kind = err.kind();
	let detail = match kind {
		ErrorKind::TokenInvalid | ErrorKind::KeyDiscoveryFailed => {
			tracing::warn!(?kind, error = %err, "sign-in rejected");

			REJECTED
		},
		ErrorKind::PersistenceUnavailable | ErrorKind::HookFailure | ErrorKind::Internal => {
			tracing::error!(?kind, error = %err, "sign-in failed");

			SERVER_FAILURE
		},
	};

	(kind.status(), AuthReply::Rejected { detail: detail.into() })
}
