//! Error types shared by credentials, the token cache, stores, and the HTTP pipeline.
//!
//! Two variants drive credential chains: [`Error::CredentialUnavailable`] means a source could
//! not even try (missing configuration, tool not installed, endpoint absent) and the chain may
//! move on, while [`Error::AuthenticationFailed`] means the source tried and the identity
//! provider rejected it, which stops the chain.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// The credential cannot be used in this environment.
	#[error(transparent)]
	CredentialUnavailable(#[from] CredentialUnavailableError),
	/// The credential attempted authentication and was rejected.
	#[error(transparent)]
	AuthenticationFailed(#[from] AuthenticationFailedError),
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeouts).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// A service call returned a non-success status.
	#[error(transparent)]
	Response(#[from] ResponseError),
}
impl Error {
	/// Shorthand for building a [`CredentialUnavailableError`].
	pub fn unavailable(credential: &'static str, message: impl Into<String>) -> Self {
		CredentialUnavailableError::new(credential, message).into()
	}

	/// Shorthand for building an [`AuthenticationFailedError`] without HTTP details.
	pub fn authentication_failed(credential: &'static str, message: impl Into<String>) -> Self {
		AuthenticationFailedError::new(credential, message).into()
	}

	/// Returns `true` when a credential chain may skip this error and try the next source.
	pub fn is_unavailable(&self) -> bool {
		matches!(self, Self::CredentialUnavailable(_))
	}

	/// Returns `true` when the failure is transient and the request may be retried.
	///
	/// Authentication failures and configuration problems are never retriable.
	pub fn is_retriable(&self) -> bool {
		match self {
			Self::Transport(_) => true,
			Self::Response(e) => matches!(e.status, 408 | 429 | 500 | 502 | 503 | 504),
			_ => false,
		}
	}

	/// Rewrites the error as [`CredentialUnavailableError`] for `credential`.
	///
	/// Used when a source runs inside a default chain, where an unexpected response from a
	/// probed endpoint means "not here" rather than "rejected".
	pub fn into_unavailable(self, credential: &'static str) -> Self {
		match self {
			Self::CredentialUnavailable(e) => Self::CredentialUnavailable(e),
			Self::AuthenticationFailed(e) =>
				CredentialUnavailableError::new(credential, e.message).into(),
			other => CredentialUnavailableError::new(credential, other.to_string()).into(),
		}
	}
}

/// A credential cannot attempt authentication (for example, missing environment variables or
/// an absent managed identity endpoint).
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{credential}: {message}")]
pub struct CredentialUnavailableError {
	/// Name of the credential that reported the condition.
	pub credential: &'static str,
	/// Human-readable explanation.
	pub message: String,
}
impl CredentialUnavailableError {
	/// Creates a new unavailable error for `credential`.
	pub fn new(credential: &'static str, message: impl Into<String>) -> Self {
		Self { credential, message: message.into() }
	}
}

/// A credential attempted authentication and the identity provider (or local tool) rejected it.
#[derive(Debug, ThisError)]
#[error("{credential} authentication failed: {message}")]
pub struct AuthenticationFailedError {
	/// Name of the credential that failed.
	pub credential: &'static str,
	/// Human-readable explanation.
	pub message: String,
	/// HTTP status returned by the identity endpoint, when available.
	pub status: Option<u16>,
	/// OAuth `error` code returned by the identity endpoint, when available.
	pub error_code: Option<String>,
	/// Underlying failure, when one exists.
	#[source]
	pub source: Option<BoxError>,
}
impl AuthenticationFailedError {
	/// Creates a new failure for `credential`.
	pub fn new(credential: &'static str, message: impl Into<String>) -> Self {
		Self { credential, message: message.into(), status: None, error_code: None, source: None }
	}

	/// Attaches the HTTP status code.
	pub fn with_status(mut self, status: Option<u16>) -> Self {
		self.status = status;

		self
	}

	/// Attaches the OAuth error code.
	pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
		self.error_code = Some(code.into());

		self
	}

	/// Attaches the underlying failure.
	pub fn with_source(mut self, source: impl 'static + Send + Sync + std::error::Error) -> Self {
		self.source = Some(Box::new(source));

		self
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A URL could not be parsed or joined.
	#[error("The {what} URL is invalid.")]
	InvalidUrl {
		/// Which URL failed.
		what: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Identity endpoints must use HTTPS.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Bearer tokens are never attached to plain HTTP requests.
	#[error(
		"Bearer token authentication is not permitted for non TLS protected (https) endpoints: {url}."
	)]
	InsecureRequest {
		/// Request URL that was rejected.
		url: String,
	},
	/// Requested scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// A tenant, client, or other identifier is malformed.
	#[error(transparent)]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// A credential that speaks "resource" received the wrong number of scopes.
	#[error("{credential} requires exactly one scope per token request, got {count}.")]
	ScopeCount {
		/// Credential name.
		credential: &'static str,
		/// Number of scopes supplied.
		count: usize,
	},
	/// The requested tenant is not in the credential's allow list.
	#[error(
		"The current credential is not configured to acquire tokens for tenant {tenant}. To enable acquiring tokens for this tenant add it to the additionally allowed tenants, or add \"*\" to allow any tenant."
	)]
	TenantNotAllowed {
		/// Requested tenant.
		tenant: String,
	},
	/// An environment variable holds a value the crate cannot use.
	#[error("Environment variable {name} has an invalid value {value:?}: {reason}.")]
	InvalidEnv {
		/// Variable name.
		name: &'static str,
		/// Offending value.
		value: String,
		/// Why the value was rejected.
		reason: String,
	},
	/// A required environment variable is not set.
	#[error("Environment variable {name} must be set.")]
	MissingEnv {
		/// Variable name.
		name: &'static str,
	},
	/// A request body could not be serialized.
	#[error("Request body could not be serialized.")]
	RequestBody(#[source] serde_json::Error),
	/// A certificate or private key could not be loaded.
	#[error("Certificate is invalid: {reason}.")]
	InvalidCertificate {
		/// Why the certificate was rejected.
		reason: String,
	},
	/// A client assertion could not be signed.
	#[error("Client assertion could not be signed.")]
	AssertionSigning(#[from] jsonwebtoken::errors::Error),
	/// A `WWW-Authenticate` challenge could not be interpreted.
	#[error("Authentication challenge is invalid: {reason}.")]
	InvalidChallenge {
		/// Why the challenge was rejected.
		reason: String,
	},
	/// A credential option contradicts the detected environment.
	#[error("{credential} does not support {feature}.")]
	Unsupported {
		/// Credential name.
		credential: &'static str,
		/// Unsupported feature description.
		feature: String,
	},
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Short description of the remote endpoint.
		target: &'static str,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
	/// HTTP client failed without a structured error.
	#[error("HTTP client error: {message}.")]
	Other {
		/// Client-supplied message.
		message: String,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(
		target: &'static str,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Network { target, source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network("the remote endpoint", e)
	}
}

/// Non-success response from an Azure service.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Request failed with status {status}: {message}")]
pub struct ResponseError {
	/// HTTP status code.
	pub status: u16,
	/// Service error code (for ARM, `error.code`).
	pub code: Option<String>,
	/// Service error message, or the raw body when it is not structured.
	pub message: String,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn unavailable_display_names_the_credential() {
		let err = Error::unavailable("EnvironmentCredential", "missing AZURE_TENANT_ID");

		assert!(err.is_unavailable());
		assert_eq!(err.to_string(), "EnvironmentCredential: missing AZURE_TENANT_ID");
	}

	#[test]
	fn authentication_failures_are_not_retriable() {
		let err: Error = AuthenticationFailedError::new("ClientSecretCredential", "invalid_client")
			.with_status(Some(401))
			.into();

		assert!(!err.is_retriable());
		assert!(!err.is_unavailable());

		let throttled: Error =
			ResponseError { status: 429, code: None, message: "slow down".into() }.into();

		assert!(throttled.is_retriable());
	}

	#[test]
	fn into_unavailable_keeps_message() {
		let err = Error::authentication_failed("ManagedIdentityCredential", "no token in body")
			.into_unavailable("ManagedIdentityCredential");

		match err {
			Error::CredentialUnavailable(e) => {
				assert_eq!(e.credential, "ManagedIdentityCredential");
				assert_eq!(e.message, "no token in body");
			},
			other => panic!("Unexpected error variant: {other:?}."),
		}
	}
}
