//! Crate-wide error types and `Result` alias.

// crates.io
use http::StatusCode;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the sign-in pipeline.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[cfg(feature = "redis")]
	#[error(transparent)]
	Redis(#[from] redis::RedisError),

	#[error("Identity token rejected: {0}")]
	TokenInvalid(String),
	#[error("Signing key discovery failed: {0}")]
	KeyDiscoveryFailed(String),
	#[error("Persistence unavailable: {0}")]
	PersistenceUnavailable(String),
	#[error("New-account hook '{hook}' failed for subject '{subject}': {reason}")]
	HookFailure { hook: String, subject: String, reason: String },
	#[error("A profile for subject '{0}' already exists.")]
	DuplicateSubject(String),

	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: StatusCode, url: url::Url, body: Option<String> },
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Classify the error into the pipeline's failure taxonomy.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::TokenInvalid(_) | Self::Jsonwebtoken(_) => ErrorKind::TokenInvalid,
			Self::KeyDiscoveryFailed(_) | Self::HttpStatus { .. } | Self::Reqwest(_) =>
				ErrorKind::KeyDiscoveryFailed,
			Self::PersistenceUnavailable(_) | Self::DuplicateSubject(_) =>
				ErrorKind::PersistenceUnavailable,
			#[cfg(feature = "redis")]
			Self::Redis(_) => ErrorKind::PersistenceUnavailable,
			Self::HookFailure { .. } => ErrorKind::HookFailure,
			Self::Http(_)
			| Self::Serde(_)
			| Self::Url(_)
			| Self::Security(_)
			| Self::Validation { .. } => ErrorKind::Internal,
		}
	}

	/// Transport status derived from [`Error::kind`].
	pub fn status(&self) -> StatusCode {
		self.kind().status()
	}

	/// Whether retrying the same request may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self.kind(),
			ErrorKind::KeyDiscoveryFailed
				| ErrorKind::PersistenceUnavailable
				| ErrorKind::HookFailure
		)
	}

	/// Fold any fault raised while talking to the key-discovery endpoint into
	/// [`Error::KeyDiscoveryFailed`].
	pub(crate) fn into_key_discovery(self) -> Self {
		match self {
			err @ Self::KeyDiscoveryFailed(_) => err,
			err => Self::KeyDiscoveryFailed(err.to_string()),
		}
	}

	/// Fold a storage-layer fault into [`Error::PersistenceUnavailable`], keeping the uniqueness
	/// violation distinguishable for insert-race recovery.
	pub(crate) fn into_persistence(self) -> Self {
		match self {
			err @ (Self::PersistenceUnavailable(_) | Self::DuplicateSubject(_)) => err,
			err => Self::PersistenceUnavailable(err.to_string()),
		}
	}
}

/// Failure taxonomy exposed to the authentication endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Signature, expiry, issuer, audience, or algorithm failure.
	///
	/// Not retryable with the same token.
	TokenInvalid,
	/// Provider-side or network fault while resolving signing keys.
	KeyDiscoveryFailed,
	/// Storage fault or storage timeout.
	PersistenceUnavailable,
	/// A new-account hook failed after the account was durably created.
	HookFailure,
	/// Any other unexpected fault.
	Internal,
}
impl ErrorKind {
	/// Transport-level status for this failure class.
	pub fn status(self) -> StatusCode {
		match self {
			Self::TokenInvalid | Self::KeyDiscoveryFailed => StatusCode::UNAUTHORIZED,
			Self::PersistenceUnavailable | Self::HookFailure | Self::Internal =>
				StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}
