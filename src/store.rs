//! Persistence seam for user profiles.
//!
//! Implementations must enforce uniqueness of the subject identifier and apply each
//! [`ProfilePatch`] as a single atomic document update.

pub mod memory;
#[cfg(feature = "redis")] pub mod redis;

// crates.io
use async_trait::async_trait;
// self
use crate::{
	_prelude::*,
	profile::{ProfilePatch, UserProfile},
};

/// Document store holding one [`UserProfile`] per subject identifier.
#[async_trait]
pub trait UserStore: Send + Sync {
	/// Fetch the profile whose `account.user_id` equals `subject`.
	async fn find_one(&self, subject: &str) -> Result<Option<UserProfile>>;

	/// Atomically apply `patch` to the profile for `subject`.
	///
	/// Returns whether a profile matched.
	async fn update_one(&self, subject: &str, patch: &ProfilePatch) -> Result<bool>;

	/// Insert a new profile.
	///
	/// Fails with [`Error::DuplicateSubject`] when a profile with the same subject already exists.
	async fn insert_one(&self, profile: &UserProfile) -> Result<()>;
}

pub use memory::MemoryUserStore;
#[cfg(feature = "redis")] pub use self::redis::RedisUserStore;
