//! Token credentials and the sources that back them.
//!
//! Every credential implements [`TokenCredential`]. Confidential clients (secret, certificate,
//! assertion, workload identity) share one token endpoint implementation. Public clients
//! (device code, authorization code) additionally keep refresh tokens in a
//! [`TokenStore`](crate::store::TokenStore). Managed identity and the developer tools speak
//! their own protocols. [`ChainedTokenCredential`] and [`DefaultAzureCredential`] compose them.

pub mod authorization_code;
pub mod azure_cli;
pub mod azure_developer_cli;
pub mod azure_powershell;
pub mod chain;
pub mod cli;
pub mod client_assertion;
pub mod client_certificate;
pub mod client_secret;
pub mod default;
pub mod device_code;
pub mod environment;
pub mod managed_identity;
pub mod workload_identity;

mod confidential;
mod public;

pub use authorization_code::*;
pub use azure_cli::*;
pub use azure_developer_cli::*;
pub use azure_powershell::*;
pub use chain::*;
pub use cli::*;
pub use client_assertion::*;
pub use client_certificate::*;
pub use client_secret::*;
pub use default::*;
pub use device_code::*;
pub use environment::*;
pub use managed_identity::*;
pub use workload_identity::*;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenRequestOptions},
	authority::AuthorityHost,
	cache::{DEFAULT_REFRESH_WINDOW, TokenCache},
	config::{self, Env},
	error::ConfigError,
	http::ReqwestHttpClient,
	policy::RetryOptions,
};

/// Boxed future returned by [`TokenCredential::get_token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<AccessToken>> + 'a + Send>>;

/// Source of access tokens.
pub trait TokenCredential
where
	Self: Send + Sync,
{
	/// Name used in error messages and telemetry, e.g. `AzureCliCredential`.
	fn name(&self) -> &'static str;

	/// Acquires a token for `options.scopes`.
	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a>;
}
impl<T> TokenCredential for Arc<T>
where
	T: ?Sized + TokenCredential,
{
	fn name(&self) -> &'static str {
		(**self).name()
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		(**self).get_token(options)
	}
}
impl Debug for dyn TokenCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenCredential").field(&self.name()).finish()
	}
}

/// Options shared by every credential that talks to Entra or a managed identity endpoint.
#[derive(Clone, Debug)]
pub struct CredentialOptions {
	/// Entra authority host.
	pub authority_host: AuthorityHost,
	/// reqwest client used for identity requests.
	pub http_client: ReqwestClient,
	/// Retry policy for identity requests.
	pub retry: RetryOptions,
	/// Tenants, besides the configured one, tokens may be requested for (`*` allows any).
	pub additionally_allowed_tenants: Vec<String>,
	/// Lookahead before expiry at which cached tokens are refreshed.
	pub refresh_window: Duration,
}
impl CredentialOptions {
	/// Reads `AZURE_AUTHORITY_HOST` and `AZURE_ADDITIONALLY_ALLOWED_TENANTS` from `env`.
	pub fn from_env(env: &Env) -> Result<Self, ConfigError> {
		Ok(Self {
			authority_host: AuthorityHost::from_env(env)?,
			additionally_allowed_tenants: env.list(config::AZURE_ADDITIONALLY_ALLOWED_TENANTS),
			..Default::default()
		})
	}

	/// Sets the authority host.
	pub fn with_authority_host(mut self, host: AuthorityHost) -> Self {
		self.authority_host = host;

		self
	}

	/// Sets the reqwest client.
	pub fn with_http_client(mut self, client: ReqwestClient) -> Self {
		self.http_client = client;

		self
	}

	/// Sets the retry policy.
	pub fn with_retry(mut self, retry: RetryOptions) -> Self {
		self.retry = retry;

		self
	}

	/// Sets the additionally allowed tenants.
	pub fn with_additionally_allowed_tenants<I, S>(mut self, tenants: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.additionally_allowed_tenants = tenants.into_iter().map(Into::into).collect();

		self
	}

	/// Sets the refresh window.
	pub fn with_refresh_window(mut self, window: Duration) -> Self {
		self.refresh_window = window;

		self
	}

	/// Token endpoint transport built from these options.
	pub fn http(&self) -> ReqwestHttpClient {
		ReqwestHttpClient::with_client(self.http_client.clone()).with_retry(self.retry.clone())
	}

	pub(crate) fn cache(&self) -> TokenCache {
		TokenCache::new().with_refresh_window(self.refresh_window)
	}
}
impl Default for CredentialOptions {
	fn default() -> Self {
		Self {
			authority_host: AuthorityHost::default(),
			http_client: ReqwestClient::default(),
			retry: RetryOptions::default(),
			additionally_allowed_tenants: Vec::new(),
			refresh_window: DEFAULT_REFRESH_WINDOW,
		}
	}
}

/// Credential that always returns the same token. Useful for tests and pre-acquired tokens.
#[derive(Clone, Debug)]
pub struct StaticCredential {
	token: AccessToken,
}
impl StaticCredential {
	/// Wraps `token`.
	pub fn new(token: AccessToken) -> Self {
		Self { token }
	}
}
impl TokenCredential for StaticCredential {
	fn name(&self) -> &'static str {
		"StaticCredential"
	}

	fn get_token<'a>(&'a self, _: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(async move {
			if self.token.is_expired_at(OffsetDateTime::now_utc()) {
				return Err(Error::authentication_failed(self.name(), "the static token expired"));
			}

			Ok(self.token.clone())
		})
	}
}

// Credentials that speak "resource" accept exactly one scope.
pub(crate) fn single_scope<'a>(
	credential: &'static str,
	options: &'a TokenRequestOptions,
) -> Result<&'a str, ConfigError> {
	match options.scopes.as_slice() {
		[scope] if !scope.is_empty() => Ok(scope),
		scopes => Err(ConfigError::ScopeCount { credential, count: scopes.len() }),
	}
}
