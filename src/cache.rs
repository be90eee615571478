//! Signing-key cache with coalesced, copy-on-write refresh.

pub mod manager;
pub mod state;

pub use manager::{KeyCache, KeyCacheStatus};
pub use state::{KeySet, SigningKey};
