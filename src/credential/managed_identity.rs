//! Managed identity for Azure hosted workloads.
//!
//! The hosting environment is detected once at construction (see [`ManagedIdentitySource`]).
//! Requests use v1 "resource" semantics, so exactly one scope is accepted per token request.

mod response;
pub mod source;

pub use source::ManagedIdentitySource;

// std
use std::{
	path::PathBuf,
	sync::atomic::{AtomicBool, Ordering},
};
// crates.io
use reqwest::{
	Request, Response, StatusCode,
	header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenRequestOptions, scope_to_resource},
	cache::{CacheKey, TokenCache},
	config::Env,
	credential::{CredentialOptions, TokenCredential, TokenFuture, single_scope},
	error::{AuthenticationFailedError, ConfigError, TransportError},
	obs,
	policy::{RetryOptions, send_with_retry},
};

const NAME: &str = "ManagedIdentityCredential";
const CACHE_TENANT: &str = "managed_identity";
const DEFAULT_PROBE_TIMEOUT: StdDuration = StdDuration::from_secs(1);
const DOCKER_DESKTOP_UNREACHABLE: &str = "A socket operation was attempted to an unreachable";

/// User-assigned identity selector. Omit it to use the system-assigned identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserAssignedId {
	/// Application (client) ID of the identity.
	ClientId(String),
	/// Object (principal) ID of the identity.
	ObjectId(String),
	/// Full ARM resource ID of the identity.
	ResourceId(String),
}

/// Options for [`ManagedIdentityCredential`].
#[derive(Clone, Debug)]
pub struct ManagedIdentityOptions {
	/// Shared credential options. The authority host is not used.
	pub credential: CredentialOptions,
	/// User-assigned identity.
	pub id: Option<UserAssignedId>,
	/// How long the IMDS probe waits inside
	/// [`DefaultAzureCredential`](crate::credential::DefaultAzureCredential).
	pub probe_timeout: StdDuration,
	/// Directory Azure Arc key files must live in. Defaults to the agent's platform directory.
	pub arc_key_directory: Option<PathBuf>,
	pub(crate) in_default_chain: bool,
}
impl ManagedIdentityOptions {
	/// Replaces the shared credential options.
	pub fn with_credential_options(mut self, credential: CredentialOptions) -> Self {
		self.credential = credential;

		self
	}

	/// Selects a user-assigned identity.
	pub fn with_id(mut self, id: UserAssignedId) -> Self {
		self.id = Some(id);

		self
	}

	/// Sets the IMDS probe timeout.
	pub fn with_probe_timeout(mut self, timeout: StdDuration) -> Self {
		self.probe_timeout = timeout;

		self
	}

	/// Overrides the Azure Arc key directory.
	pub fn with_arc_key_directory(mut self, directory: impl Into<PathBuf>) -> Self {
		self.arc_key_directory = Some(directory.into());

		self
	}

	// Probe IMDS first and report unexpected responses as unavailable.
	pub(crate) fn in_default_chain(mut self) -> Self {
		self.in_default_chain = true;

		self
	}
}
impl Default for ManagedIdentityOptions {
	fn default() -> Self {
		Self {
			credential: CredentialOptions::default(),
			id: None,
			probe_timeout: DEFAULT_PROBE_TIMEOUT,
			arc_key_directory: None,
			in_default_chain: false,
		}
	}
}

/// Acquires tokens from the managed identity endpoint of the hosting environment.
#[derive(Debug)]
pub struct ManagedIdentityCredential {
	source: ManagedIdentitySource,
	id: Option<UserAssignedId>,
	client: ReqwestClient,
	retry: RetryOptions,
	cache: TokenCache,
	probe_timeout: StdDuration,
	probed: AtomicBool,
	in_default_chain: bool,
	arc_key_directory: Option<PathBuf>,
}
impl ManagedIdentityCredential {
	/// Detects the hosting environment from the process environment.
	pub fn new(options: ManagedIdentityOptions) -> Result<Self> {
		Self::from_env(&Env::process(), options)
	}

	/// Detects the hosting environment from `env`.
	pub fn from_env(env: &Env, options: ManagedIdentityOptions) -> Result<Self> {
		let source = ManagedIdentitySource::detect(env)?;
		// Service Fabric endpoints present a self-signed certificate.
		let client = match source {
			ManagedIdentitySource::ServiceFabric { .. } => ReqwestClient::builder()
				.danger_accept_invalid_certs(true)
				.build()
				.map_err(ConfigError::from)?,
			_ => options.credential.http_client.clone(),
		};
		let mut retry = options.credential.retry.clone();

		if source.is_imds() {
			retry.status_codes.extend([404, 410]);
		}

		obs::event_debug!(
			credential = NAME,
			source = source.name(),
			"Managed identity source detected."
		);

		Ok(Self {
			arc_key_directory: options
				.arc_key_directory
				.clone()
				.or_else(|| source::default_arc_key_directory(env)),
			cache: options.credential.cache(),
			source,
			id: options.id,
			client,
			retry,
			probe_timeout: options.probe_timeout,
			probed: AtomicBool::new(false),
			in_default_chain: options.in_default_chain,
		})
	}

	/// Detected hosting environment.
	pub fn source(&self) -> &ManagedIdentitySource {
		&self.source
	}

	async fn token(&self, options: &TokenRequestOptions) -> Result<AccessToken> {
		let resource = scope_to_resource(single_scope(NAME, options)?);

		if self.id.is_some() && !self.source.supports_user_assigned() {
			return Err(self.failure(
				None,
				format!(
					"{} managed identity doesn't support specifying a user-assigned identity",
					self.source
				),
			));
		}

		let key = CacheKey::new(CACHE_TENANT, options.scope_set()?, false);

		self.cache.get_or_fetch(&key, options.claims().is_some(), || self.fetch(resource)).await
	}

	async fn fetch(&self, resource: &str) -> Result<AccessToken> {
		if self.in_default_chain && self.source.is_imds() && !self.probed.load(Ordering::Acquire) {
			self.probe().await?;
		}

		let request = self.source.token_request(&self.client, resource, self.id.as_ref())?;
		let mut response = self.send(request).await?;

		if response.status() == StatusCode::UNAUTHORIZED
			&& matches!(self.source, ManagedIdentitySource::AzureArc { .. })
		{
			let key = self.arc_key(&response)?;
			let mut request = self.source.token_request(&self.client, resource, self.id.as_ref())?;
			let mut value = HeaderValue::from_str(&format!("Basic {key}"))
				.map_err(|_| self.failure(None, "Azure Arc key is not a valid header value"))?;

			value.set_sensitive(true);
			request.headers_mut().insert(AUTHORIZATION, value);
			response = self.send(request).await?;
		}

		let status = response.status();
		let body = response.bytes().await.map_err(|e| TransportError::network(self.target(), e))?;

		if status.is_success() {
			return response::parse_token(&body, OffsetDateTime::now_utc())
				.map_err(|message| self.failure(Some(status.as_u16()), message));
		}

		let text = String::from_utf8_lossy(&body);

		if self.source.is_imds() {
			if status == StatusCode::BAD_REQUEST {
				return Err(Error::unavailable(
					NAME,
					format!("the requested identity isn't assigned to this resource: {text}"),
				));
			}
			if status == StatusCode::FORBIDDEN && text.contains(DOCKER_DESKTOP_UNREACHABLE) {
				return Err(Error::unavailable(NAME, format!("IMDS is unreachable: {text}")));
			}
		}

		Err(AuthenticationFailedError::new(
			NAME,
			format!("{} responded with {status}: {text}", self.source),
		)
		.with_status(Some(status.as_u16()))
		.into())
	}

	// Any HTTP response means IMDS is present; only timeouts and connection failures fail.
	async fn probe(&self) -> Result<()> {
		let request = self.source.probe_request(&self.client, self.probe_timeout)?;

		obs::event_debug!(credential = NAME, url = %request.url(), "Probing IMDS.");

		match self.client.execute(request).await {
			Ok(_) => {
				self.probed.store(true, Ordering::Release);

				Ok(())
			},
			Err(e) if e.is_timeout() => Err(Error::unavailable(NAME, "managed identity timed out")),
			Err(e) => Err(Error::unavailable(NAME, format!("failed to reach IMDS: {e}"))),
		}
	}

	async fn send(&self, request: Request) -> Result<Response> {
		send_with_retry(&self.client, request, &self.retry).await.map_err(|e| {
			if self.source.is_imds() && (e.is_connect() || e.is_timeout()) {
				Error::unavailable(NAME, format!("no response from the IMDS endpoint: {e}"))
			} else {
				TransportError::network(self.target(), e).into()
			}
		})
	}

	fn arc_key(&self, response: &Response) -> Result<String> {
		let realm = response
			.headers()
			.get(WWW_AUTHENTICATE)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| {
				let (scheme, params) = value.trim().split_once(char::is_whitespace)?;

				scheme.eq_ignore_ascii_case("basic").then_some(params)?.trim().split_once('=')
			})
			.filter(|(name, _)| name.trim().eq_ignore_ascii_case("realm"))
			.map(|(_, path)| PathBuf::from(path.trim().trim_matches('"')))
			.ok_or_else(|| {
				self.failure(Some(401), "Azure Arc response is missing a Basic realm challenge")
			})?;
		let directory = self.arc_key_directory.as_deref().ok_or_else(|| {
			self.failure(None, "Azure Arc managed identity isn't supported on this platform")
		})?;

		source::read_arc_key(&realm, directory).map_err(|message| self.failure(None, message))
	}

	// Inside the default chain an unexpected answer means "not here", so the chain continues.
	fn failure(&self, status: Option<u16>, message: impl Into<String>) -> Error {
		if self.in_default_chain {
			Error::unavailable(NAME, message)
		} else {
			AuthenticationFailedError::new(NAME, message).with_status(status).into()
		}
	}

	fn target(&self) -> &'static str {
		match self.source {
			ManagedIdentitySource::Imds { .. } => "the IMDS endpoint",
			_ => "the managed identity endpoint",
		}
	}
}
impl TokenCredential for ManagedIdentityCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(NAME, "get_token", self.token(options)))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::config;

	fn cloud_shell(options: ManagedIdentityOptions) -> ManagedIdentityCredential {
		let env = Env::from_pairs([(config::MSI_ENDPOINT, "http://localhost:50342/oauth2/token")]);

		ManagedIdentityCredential::from_env(&env, options)
			.expect("Cloud Shell environment should be detected.")
	}

	#[tokio::test]
	async fn requires_exactly_one_scope() {
		let credential = cloud_shell(Default::default());
		let err = credential
			.get_token(&TokenRequestOptions::new(["a/.default", "b/.default"]))
			.await
			.expect_err("Two scopes must be rejected.");

		assert!(matches!(err, Error::Config(ConfigError::ScopeCount { count: 2, .. })));
		assert!(err.to_string().contains("scope"));
	}

	#[tokio::test]
	async fn user_assigned_ids_are_rejected_where_unsupported() {
		let options = TokenRequestOptions::new(["https://management.azure.com/.default"]);
		let credential = cloud_shell(
			ManagedIdentityOptions::default().with_id(UserAssignedId::ClientId("client".into())),
		);
		let err = credential.get_token(&options).await.expect_err("Cloud Shell has no user IDs.");

		assert!(matches!(err, Error::AuthenticationFailed(_)));
		assert!(err.to_string().contains("Cloud Shell"));

		let credential = cloud_shell(
			ManagedIdentityOptions::default()
				.with_id(UserAssignedId::ClientId("client".into()))
				.in_default_chain(),
		);
		let err = credential.get_token(&options).await.expect_err("Cloud Shell has no user IDs.");

		assert!(err.is_unavailable(), "The default chain must be able to move on: {err}");
	}

	#[test]
	fn imds_retries_not_found() {
		let credential =
			ManagedIdentityCredential::from_env(&Env::default(), ManagedIdentityOptions::default())
				.expect("IMDS is always available as a fallback.");

		assert!(credential.source().is_imds());
		assert!(credential.retry.retries_status(404));
		assert!(credential.retry.retries_status(410));
	}
}
