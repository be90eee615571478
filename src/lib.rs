//! Sign in with Apple for Rust services: identity-token verification over a coalescing JWKS key
//! cache, idempotent user-profile reconciliation, and ordered new-account hooks.
//!
//! The pipeline is `Authenticator` → `TokenVerifier` → `Reconciler` → `HookRegistry`. Every stage
//! returns the crate [`Error`]; only the endpoint turns errors into transport responses.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod endpoint;
pub mod hooks;
pub mod http;
pub mod metrics;
pub mod profile;
pub mod reconcile;
pub mod security;
pub mod store;
pub mod verifier;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::{KeyCache, KeyCacheStatus, KeySet, SigningKey},
	config::{AudienceConfig, JitterStrategy, ProviderConfig, ReconcilerConfig, RetryPolicy},
	endpoint::{AuthReply, AuthRequest, AuthResponse, Authenticator},
	error::{Error, ErrorKind, Result},
	hooks::{HookFailurePolicy, HookRegistry, HookRegistryBuilder, NewAccountHook, hook_fn},
	profile::{RecipePreferences, UserIdentity, UserPreferences, UserProfile},
	reconcile::{ReconcileInput, Reconciled, Reconciler},
	store::{MemoryUserStore, UserStore},
	verifier::{TokenVerifier, VerifiedClaims},
};
