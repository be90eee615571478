//! Idempotent reconciliation of verified identities into stored user profiles.
//!
//! A sign-in either finds the subject's profile and merges in newly learned fields, or creates the
//! profile and fires the new-account hooks. Uniqueness of the subject is left to the store; losing
//! an insert race is recovered by merging into the winner's record.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	future::Future,
};
// crates.io
use tokio::time;
// self
use crate::{
	_prelude::*,
	config::ReconcilerConfig,
	hooks::HookRegistry,
	metrics,
	profile::{IdentityPatch, ProfilePatch, UserIdentity, UserProfile},
	store::UserStore,
	verifier::VerifiedClaims,
};

/// Everything known about the user at sign-in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileInput {
	/// Verified subject identifier.
	pub subject: String,
	/// Email from the verified token.
	pub email: Option<String>,
	/// Display name supplied by the client.
	pub name: Option<String>,
	/// Birth date supplied by the client.
	pub birthday: Option<DateTime<Utc>>,
	/// Onboarding goals, used only when the profile is created.
	pub top_goals: Vec<String>,
}
impl ReconcileInput {
	/// Combine verified claims with client-supplied profile fields.
	///
	/// Blank names are treated as absent.
	pub fn from_claims(
		claims: VerifiedClaims,
		name: Option<String>,
		birthday: Option<DateTime<Utc>>,
		top_goals: Vec<String>,
	) -> Self {
		Self {
			subject: claims.subject,
			email: claims.email,
			name: name.filter(|name| !name.trim().is_empty()),
			birthday,
			top_goals,
		}
	}
}

/// Result of a reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciled {
	/// Profile as it stands after the merge or insert.
	pub profile: UserProfile,
	/// Whether this call created the profile.
	pub is_new_account: bool,
}

/// Compute the patch that brings `existing` up to date with `input`.
///
/// Email is only ever backfilled. The identity sub-record is created when both name and birth
/// date are known, and otherwise only updated field by field where a value actually differs.
pub fn plan_merge(existing: &UserProfile, input: &ReconcileInput) -> ProfilePatch {
	let email = match (&existing.account.email, &input.email) {
		(None, Some(email)) => Some(email.clone()),
		_ => None,
	};
	let identity = match (&existing.identity, &input.name, input.birthday) {
		(None, Some(name), Some(birthday)) =>
			Some(IdentityPatch::Create(UserIdentity { name: name.clone(), birthday })),
		(None, _, _) => None,
		(Some(stored), name, birthday) => {
			let name = name.as_ref().filter(|name| **name != stored.name).cloned();
			let birthday = birthday.filter(|birthday| *birthday != stored.birthday);

			(name.is_some() || birthday.is_some())
				.then_some(IdentityPatch::Update { name, birthday })
		},
	};

	ProfilePatch { email, identity }
}

/// Finds or creates user profiles and runs new-account hooks.
#[derive(Clone)]
pub struct Reconciler {
	store: Arc<dyn UserStore>,
	hooks: HookRegistry,
	config: ReconcilerConfig,
}
impl Reconciler {
	/// Build a reconciler with default configuration.
	pub fn new(store: Arc<dyn UserStore>, hooks: HookRegistry) -> Self {
		Self::with_config(store, hooks, ReconcilerConfig::default())
	}

	/// Build a reconciler with explicit configuration.
	pub fn with_config(
		store: Arc<dyn UserStore>,
		hooks: HookRegistry,
		config: ReconcilerConfig,
	) -> Self {
		Self { store, hooks, config }
	}

	/// Hooks fired on account creation.
	pub fn hooks(&self) -> &HookRegistry {
		&self.hooks
	}

	/// Find or create the profile for `input.subject`.
	///
	/// Concurrent calls for the same subject yield exactly one stored profile and exactly one
	/// `is_new_account == true`. Hooks fire only after the profile is durably stored.
	#[tracing::instrument(skip_all, fields(subject = %input.subject))]
	pub async fn reconcile(&self, input: ReconcileInput) -> Result<Reconciled> {
		if let Some(existing) = self.find(&input.subject).await? {
			let profile = self.merge_into(existing, &input).await?;

			return Ok(Reconciled { profile, is_new_account: false });
		}

		let profile = UserProfile::new(
			input.subject.clone(),
			input.email.clone(),
			input.name.clone(),
			input.birthday,
			input.top_goals.clone(),
		);

		match self.bounded("insert", self.store.insert_one(&profile)).await {
			Ok(()) => {},
			Err(Error::DuplicateSubject(_)) => {
				tracing::info!("lost the insert race; merging into the stored profile");
				metrics::record_reconcile("race_recovered");

				let existing = self.find(&input.subject).await?.ok_or_else(|| {
					Error::PersistenceUnavailable(
						"Profile reported as duplicate but could not be read back.".into(),
					)
				})?;
				let profile = self.merge_into(existing, &input).await?;

				return Ok(Reconciled { profile, is_new_account: false });
			},
			Err(err) => return Err(err),
		}

		metrics::record_reconcile("created");
		tracing::info!("created profile");

		self.hooks.dispatch(&profile.id, self.config.hook_policy).await?;

		Ok(Reconciled { profile, is_new_account: true })
	}

	async fn merge_into(
		&self,
		mut existing: UserProfile,
		input: &ReconcileInput,
	) -> Result<UserProfile> {
		let patch = plan_merge(&existing, input);

		if patch.is_empty() {
			metrics::record_reconcile("unchanged");
			tracing::debug!("profile already up to date");

			return Ok(existing);
		}

		let matched = self.bounded("update", self.store.update_one(&existing.id, &patch)).await?;

		if !matched {
			tracing::warn!("profile vanished before the merge was applied");

			return Err(Error::PersistenceUnavailable(format!(
				"Profile for subject '{}' disappeared before the merge was applied.",
				existing.id
			)));
		}

		patch.apply(&mut existing);
		metrics::record_reconcile("updated");
		tracing::info!(
			email = patch.email.is_some(),
			identity = patch.identity.is_some(),
			"merged sign-in fields into profile"
		);

		Ok(existing)
	}

	async fn find(&self, subject: &str) -> Result<Option<UserProfile>> {
		self.bounded("lookup", self.store.find_one(subject)).await
	}

	async fn bounded<T>(
		&self,
		operation: &'static str,
		future: impl Future<Output = Result<T>>,
	) -> Result<T> {
		match time::timeout(self.config.persistence_timeout, future).await {
			Ok(result) => result.map_err(Error::into_persistence),
			Err(_) => Err(Error::PersistenceUnavailable(format!(
				"Profile {operation} timed out after {:?}.",
				self.config.persistence_timeout
			))),
		}
	}
}
impl Debug for Reconciler {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Reconciler")
			.field("hooks", &self.hooks)
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}
