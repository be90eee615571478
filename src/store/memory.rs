//! In-process [`UserStore`] with the same uniqueness and atomicity guarantees as a document store.

// std
use std::{
	collections::HashMap,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use async_trait::async_trait;
use tokio::sync::RwLock;
// self
use crate::{
	_prelude::*,
	profile::{ProfilePatch, UserProfile},
	store::UserStore,
};

/// Profiles held in a map guarded by a single lock.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
	profiles: RwLock<HashMap<String, UserProfile>>,
	writes: AtomicU64,
}
impl MemoryUserStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of inserts and updates issued against the store, including failed ones.
	pub fn writes(&self) -> u64 {
		self.writes.load(Ordering::Relaxed)
	}

	/// Number of stored profiles.
	pub async fn len(&self) -> usize {
		self.profiles.read().await.len()
	}

	/// Whether the store holds no profiles.
	pub async fn is_empty(&self) -> bool {
		self.profiles.read().await.is_empty()
	}
}
#[async_trait]
impl UserStore for MemoryUserStore {
	async fn find_one(&self, subject: &str) -> Result<Option<UserProfile>> {
		let profiles = self.profiles.read().await;

		Ok(profiles.values().find(|profile| profile.account.user_id == subject).cloned())
	}

	async fn update_one(&self, subject: &str, patch: &ProfilePatch) -> Result<bool> {
		self.writes.fetch_add(1, Ordering::Relaxed);

		let mut profiles = self.profiles.write().await;

		match profiles.get_mut(subject) {
			Some(profile) => {
				patch.apply(profile);

				Ok(true)
			},
			None => Ok(false),
		}
	}

	async fn insert_one(&self, profile: &UserProfile) -> Result<()> {
		self.writes.fetch_add(1, Ordering::Relaxed);

		if profile.id != profile.account.user_id {
			return Err(Error::Validation {
				field: "account.user_id",
				reason: "Must equal the profile id.".into(),
			});
		}

		let mut profiles = self.profiles.write().await;

		if profiles.contains_key(&profile.id) {
			return Err(Error::DuplicateSubject(profile.id.clone()));
		}

		profiles.insert(profile.id.clone(), profile.clone());

		Ok(())
	}
}
