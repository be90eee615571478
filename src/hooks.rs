//! New-account hooks.
//!
//! Hooks are collected through [`HookRegistryBuilder`] during start-up and frozen into a
//! [`HookRegistry`] that is handed to the reconciler. Registration after start-up is impossible by
//! construction.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	future::Future,
};
// crates.io
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, metrics};

/// Callback run once for every newly created account.
#[async_trait]
pub trait NewAccountHook: Send + Sync {
	/// Label used in logs, metrics, and [`Error::HookFailure`].
	fn name(&self) -> &str;

	/// React to the creation of the account identified by `subject`.
	async fn on_new_account(&self, subject: &str) -> Result<()>;
}

/// Adapter turning an async closure into a [`NewAccountHook`].
pub struct FnHook<F> {
	name: String,
	f: F,
}
#[async_trait]
impl<F, Fut> NewAccountHook for FnHook<F>
where
	F: Fn(String) -> Fut + Send + Sync,
	Fut: Future<Output = Result<()>> + Send,
{
	fn name(&self) -> &str {
		&self.name
	}

	async fn on_new_account(&self, subject: &str) -> Result<()> {
		(self.f)(subject.to_owned()).await
	}
}

/// Wrap an async closure as a named hook.
pub fn hook_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHook<F>
where
	F: Fn(String) -> Fut + Send + Sync,
	Fut: Future<Output = Result<()>> + Send,
{
	FnHook { name: name.into(), f }
}

/// How hook failures reach the caller of the reconciler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookFailurePolicy {
	/// Run hooks inline and surface the first failure as [`Error::HookFailure`].
	#[default]
	Propagate,
	/// Run hooks on a background task; failures are logged and counted, never returned.
	Detached,
}

/// Start-up builder for [`HookRegistry`].
#[derive(Default)]
pub struct HookRegistryBuilder {
	hooks: Vec<Arc<dyn NewAccountHook>>,
}
impl HookRegistryBuilder {
	/// Create an empty builder.
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a hook; hooks run in registration order.
	pub fn register<H>(mut self, hook: H) -> Self
	where
		H: NewAccountHook + 'static,
	{
		self.hooks.push(Arc::new(hook));

		self
	}

	/// Freeze the hook list.
	pub fn build(self) -> HookRegistry {
		HookRegistry { hooks: self.hooks.into() }
	}
}

/// Immutable, ordered list of new-account hooks.
#[derive(Clone)]
pub struct HookRegistry {
	hooks: Arc<[Arc<dyn NewAccountHook>]>,
}
impl HookRegistry {
	/// Create a [`HookRegistryBuilder`].
	pub fn builder() -> HookRegistryBuilder {
		HookRegistryBuilder::new()
	}

	/// Registry without hooks.
	pub fn empty() -> Self {
		HookRegistryBuilder::new().build()
	}

	/// Number of registered hooks.
	pub fn len(&self) -> usize {
		self.hooks.len()
	}

	/// Whether no hooks are registered.
	pub fn is_empty(&self) -> bool {
		self.hooks.is_empty()
	}

	/// Hook names in dispatch order.
	pub fn names(&self) -> Vec<&str> {
		self.hooks.iter().map(|hook| hook.name()).collect()
	}

	/// Run every hook once, in order, each to completion before the next starts.
	///
	/// Stops at the first failure, since later hooks may depend on earlier ones.
	#[tracing::instrument(skip(self), fields(hooks = self.hooks.len()))]
	pub async fn dispatch_new_account(&self, subject: &str) -> Result<()> {
		for hook in self.hooks.iter() {
			if let Err(err) = hook.on_new_account(subject).await {
				metrics::record_hook_failure(hook.name());
				tracing::warn!(hook = hook.name(), error = %err, "new-account hook failed");

				return Err(Error::HookFailure {
					hook: hook.name().to_owned(),
					subject: subject.to_owned(),
					reason: err.to_string(),
				});
			}

			tracing::debug!(hook = hook.name(), "new-account hook completed");
		}

		Ok(())
	}

	/// Dispatch according to `policy`.
	pub async fn dispatch(&self, subject: &str, policy: HookFailurePolicy) -> Result<()> {
		if self.is_empty() {
			return Ok(());
		}

		match policy {
			HookFailurePolicy::Propagate => self.dispatch_new_account(subject).await,
			HookFailurePolicy::Detached => {
				let registry = self.clone();
				let subject = subject.to_owned();

				tokio::spawn(async move {
					// Failures are already logged and counted by `dispatch_new_account`.
					let _ = registry.dispatch_new_account(&subject).await;
				});

				Ok(())
			},
		}
	}
}
impl Default for HookRegistry {
	fn default() -> Self {
		Self::empty()
	}
}
impl Debug for HookRegistry {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("HookRegistry").field("hooks", &self.names()).finish()
	}
}
