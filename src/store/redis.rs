//! Redis-backed [`UserStore`]: one hash per profile, written through Lua scripts so the existence
//! check and the write happen atomically on the server.

// std
use std::collections::HashMap;
// crates.io
use async_trait::async_trait;
use redis::{AsyncCommands, Script};
// self
use crate::{
	_prelude::*,
	profile::{IdentityPatch, ProfilePatch, UserAccount, UserIdentity, UserPreferences, UserProfile},
	store::UserStore,
};

const FIELD_USER_ID: &str = "account.user_id";
const FIELD_EMAIL: &str = "account.email";
const FIELD_NAME: &str = "identity.name";
const FIELD_BIRTHDAY: &str = "identity.birthday";
const FIELD_PREFERENCES: &str = "preferences";
const FIELD_POINTS: &str = "points";

const INSERT_IF_ABSENT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
	return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
";
const UPDATE_IF_PRESENT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
	return 0
end
if #ARGV > 0 then
	redis.call('HSET', KEYS[1], unpack(ARGV))
end
return 1
";

/// Profiles stored as Redis hashes under `{namespace}:user:{subject}`.
#[derive(Clone, Debug)]
pub struct RedisUserStore {
	client: redis::Client,
	namespace: Arc<str>,
}
impl RedisUserStore {
	/// Create a store using the default `signin` namespace.
	pub fn new(client: redis::Client) -> Self {
		Self { client, namespace: Arc::from("signin") }
	}

	/// Override the key namespace.
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Arc::from(namespace.into());

		self
	}

	fn key(&self, subject: &str) -> String {
		format!("{}:user:{subject}", self.namespace)
	}
}
#[async_trait]
impl UserStore for RedisUserStore {
	async fn find_one(&self, subject: &str) -> Result<Option<UserProfile>> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;
		let fields: HashMap<String, String> = conn.hgetall(self.key(subject)).await?;

		if fields.is_empty() {
			return Ok(None);
		}

		decode_profile(fields).map(Some)
	}

	async fn update_one(&self, subject: &str, patch: &ProfilePatch) -> Result<bool> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;
		let script = Script::new(UPDATE_IF_PRESENT);
		let key = self.key(subject);
		let mut invocation = script.key(&key);

		for (field, value) in encode_patch(patch) {
			invocation.arg(field).arg(value);
		}

		let matched: i64 = invocation.invoke_async(&mut conn).await?;

		Ok(matched == 1)
	}

	async fn insert_one(&self, profile: &UserProfile) -> Result<()> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;
		let script = Script::new(INSERT_IF_ABSENT);
		let key = self.key(&profile.id);
		let mut invocation = script.key(&key);

		for (field, value) in encode_profile(profile)? {
			invocation.arg(field).arg(value);
		}

		let inserted: i64 = invocation.invoke_async(&mut conn).await?;

		if inserted == 0 {
			return Err(Error::DuplicateSubject(profile.id.clone()));
		}

		Ok(())
	}
}

fn encode_profile(profile: &UserProfile) -> Result<Vec<(&'static str, String)>> {
	let mut fields = vec![
		(FIELD_USER_ID, profile.account.user_id.clone()),
		(FIELD_PREFERENCES, serde_json::to_string(&profile.preferences)?),
		(FIELD_POINTS, profile.points.to_string()),
	];

	if let Some(email) = &profile.account.email {
		fields.push((FIELD_EMAIL, email.clone()));
	}
	if let Some(identity) = &profile.identity {
		fields.push((FIELD_NAME, identity.name.clone()));
		fields.push((FIELD_BIRTHDAY, identity.birthday.to_rfc3339()));
	}

	Ok(fields)
}

fn encode_patch(patch: &ProfilePatch) -> Vec<(&'static str, String)> {
	let mut fields = Vec::new();

	if let Some(email) = &patch.email {
		fields.push((FIELD_EMAIL, email.clone()));
	}

	match &patch.identity {
		Some(IdentityPatch::Create(identity)) => {
			fields.push((FIELD_NAME, identity.name.clone()));
			fields.push((FIELD_BIRTHDAY, identity.birthday.to_rfc3339()));
		},
		Some(IdentityPatch::Update { name, birthday }) => {
			if let Some(name) = name {
				fields.push((FIELD_NAME, name.clone()));
			}
			if let Some(birthday) = birthday {
				fields.push((FIELD_BIRTHDAY, birthday.to_rfc3339()));
			}
		},
		None => {},
	}

	fields
}

fn decode_profile(mut fields: HashMap<String, String>) -> Result<UserProfile> {
	let user_id = fields.remove(FIELD_USER_ID).ok_or_else(|| {
		Error::PersistenceUnavailable("Stored profile is missing its subject.".into())
	})?;
	let identity = match (fields.remove(FIELD_NAME), fields.remove(FIELD_BIRTHDAY)) {
		(Some(name), Some(birthday)) => {
			let birthday = DateTime::parse_from_rfc3339(&birthday)
				.map_err(|err| {
					Error::PersistenceUnavailable(format!("Stored birthday is unreadable: {err}."))
				})?
				.with_timezone(&Utc);

			Some(UserIdentity { name, birthday })
		},
		_ => None,
	};
	let preferences = match fields.remove(FIELD_PREFERENCES) {
		Some(json) => serde_json::from_str(&json)?,
		None => UserPreferences::default(),
	};
	let points = fields.get(FIELD_POINTS).and_then(|points| points.parse().ok()).unwrap_or(0.);

	Ok(UserProfile {
		id: user_id.clone(),
		account: UserAccount { user_id, email: fields.remove(FIELD_EMAIL) },
		identity,
		preferences,
		points,
	})
}
