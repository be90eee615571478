//! Persisted user profile and the merge-patch applied to it.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Account sub-record. `user_id` always equals the profile's primary key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
	/// Provider subject identifier.
	pub user_id: String,
	/// Email address, backfilled once and never overwritten.
	#[serde(default)]
	pub email: Option<String>,
}

/// Identity sub-record, present only once both fields are known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
	/// Display name.
	pub name: String,
	/// Birth date.
	pub birthday: DateTime<Utc>,
}

/// Dietary restriction applied to recipe suggestions.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DietType {
	Pescatarian,
	Vegetarian,
	Vegan,
	RawVegan,
}

/// Upper bound on recipe difficulty.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecipeComplexity {
	VeryEasy,
	Easy,
	Medium,
	Hard,
	VeryHard,
}

/// Recipe filtering and presentation settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipePreferences {
	#[allow(missing_docs)]
	#[serde(default)]
	pub diet_type: Option<DietType>,
	#[allow(missing_docs)]
	#[serde(default)]
	pub excluded_ingredients: Vec<String>,
	#[allow(missing_docs)]
	#[serde(default)]
	pub max_complexity: Option<RecipeComplexity>,
	/// Free-form instructions appended to every generated recipe.
	#[serde(default)]
	pub default_instructions: Option<String>,
	/// Unit system for quantities, `US` unless the user picked another.
	#[serde(default = "default_measurement_system")]
	pub measurement_system: String,
}
impl Default for RecipePreferences {
	fn default() -> Self {
		Self {
			diet_type: None,
			excluded_ingredients: Vec::new(),
			max_complexity: None,
			default_instructions: None,
			measurement_system: default_measurement_system(),
		}
	}
}

/// GUI toggles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuiPreferences {
	#[allow(missing_docs)]
	#[serde(default)]
	pub background_images_enabled: bool,
	#[allow(missing_docs)]
	#[serde(default)]
	pub beta_features_enabled: bool,
}

/// Preference sub-record. Seeded at creation and owned by other subsystems afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
	/// Goals picked during onboarding.
	#[serde(default)]
	pub top_goals: Vec<String>,
	#[allow(missing_docs)]
	#[serde(default)]
	pub recipe_preferences: RecipePreferences,
	#[allow(missing_docs)]
	#[serde(default)]
	pub gui_preferences: GuiPreferences,
	#[allow(missing_docs)]
	#[serde(default)]
	pub saved_recipe_ids: Vec<String>,
	#[allow(missing_docs)]
	#[serde(default)]
	pub dismissed_recipe_ids: Vec<String>,
	#[allow(missing_docs)]
	#[serde(default)]
	pub blocked_user_ids: Vec<String>,
}
impl UserPreferences {
	/// Default preferences seeded with onboarding goals.
	pub fn with_goals(top_goals: Vec<String>) -> Self {
		Self { top_goals, ..Self::default() }
	}
}

/// A user profile keyed by provider subject identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
	/// Primary key; equals `account.user_id`.
	#[serde(rename = "_id")]
	pub id: String,
	#[allow(missing_docs)]
	pub account: UserAccount,
	#[allow(missing_docs)]
	#[serde(default)]
	pub identity: Option<UserIdentity>,
	#[allow(missing_docs)]
	pub preferences: UserPreferences,
	/// Point balance, owned by other subsystems.
	#[serde(default)]
	pub points: f64,
}
impl UserProfile {
	/// Build a first-sign-in profile.
	///
	/// The identity sub-record is only created when both `name` and `birthday` are supplied.
	pub fn new(
		subject: impl Into<String>,
		email: Option<String>,
		name: Option<String>,
		birthday: Option<DateTime<Utc>>,
		top_goals: Vec<String>,
	) -> Self {
		let subject = subject.into();
		let identity = match (name, birthday) {
			(Some(name), Some(birthday)) => Some(UserIdentity { name, birthday }),
			_ => None,
		};

		Self {
			id: subject.clone(),
			account: UserAccount { user_id: subject, email },
			identity,
			preferences: UserPreferences::with_goals(top_goals),
			points: 0.,
		}
	}

	/// Subject identifier.
	pub fn subject(&self) -> &str {
		&self.id
	}

	/// Stored display name.
	pub fn name(&self) -> Option<&str> {
		self.identity.as_ref().map(|identity| identity.name.as_str())
	}

	/// Stored email.
	pub fn email(&self) -> Option<&str> {
		self.account.email.as_deref()
	}
}

/// Partial update naming only the fields to change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
	/// New `account.email`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	/// Identity change.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub identity: Option<IdentityPatch>,
}
impl ProfilePatch {
	/// Whether the patch would change nothing.
	pub fn is_empty(&self) -> bool {
		self.email.is_none() && self.identity.as_ref().is_none_or(IdentityPatch::is_empty)
	}

	/// Apply the patch in place.
	pub fn apply(&self, profile: &mut UserProfile) {
		if let Some(email) = &self.email {
			profile.account.email = Some(email.clone());
		}

		match (&self.identity, &mut profile.identity) {
			(Some(IdentityPatch::Create(identity)), slot) => *slot = Some(identity.clone()),
			(Some(IdentityPatch::Update { name, birthday }), Some(identity)) => {
				if let Some(name) = name {
					identity.name = name.clone();
				}
				if let Some(birthday) = birthday {
					identity.birthday = *birthday;
				}
			},
			// Field updates never conjure an identity; creation needs both fields.
			(Some(IdentityPatch::Update { .. }), None) | (None, _) => {},
		}
	}
}

fn default_measurement_system() -> String {
	"US".into()
}

/// Change to the identity sub-record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPatch {
	/// Create the sub-record with both fields.
	Create(UserIdentity),
	/// Overwrite individual fields of an existing sub-record.
	Update {
		#[allow(missing_docs)]
		#[serde(default, skip_serializing_if = "Option::is_none")]
		name: Option<String>,
		#[allow(missing_docs)]
		#[serde(default, skip_serializing_if = "Option::is_none")]
		birthday: Option<DateTime<Utc>>,
	},
}
impl IdentityPatch {
	fn is_empty(&self) -> bool {
		matches!(self, Self::Update { name: None, birthday: None })
	}
}
