//! Kubernetes workload identity federation.
//!
//! The service account token projected into the pod is exchanged as a client assertion. The
//! file is re-read at most every five minutes since kubelet rotates it in place.

// std
use std::path::{Path, PathBuf};
// self
use crate::{
	_prelude::*,
	auth::{ClientId, TenantId, TokenRequestOptions},
	config::{self, Env},
	credential::{
		AssertionFuture, ClientAssertion, CredentialOptions, TokenCredential, TokenFuture,
		confidential::{ClientAuth, ConfidentialClient},
	},
	obs,
};

const NAME: &str = "WorkloadIdentityCredential";
const FILE_REFRESH: Duration = Duration::minutes(5);

/// Configuration for [`WorkloadIdentityCredential`]. Unset fields fall back to the
/// environment.
#[derive(Clone, Debug, Default)]
pub struct WorkloadIdentityOptions {
	/// Shared credential options.
	pub credential: CredentialOptions,
	/// Overrides `AZURE_TENANT_ID`.
	pub tenant_id: Option<TenantId>,
	/// Overrides `AZURE_CLIENT_ID`.
	pub client_id: Option<ClientId>,
	/// Overrides `AZURE_FEDERATED_TOKEN_FILE`.
	pub token_file_path: Option<PathBuf>,
}
impl WorkloadIdentityOptions {
	/// Sets the tenant.
	pub fn with_tenant_id(mut self, tenant_id: TenantId) -> Self {
		self.tenant_id = Some(tenant_id);

		self
	}

	/// Sets the client.
	pub fn with_client_id(mut self, client_id: ClientId) -> Self {
		self.client_id = Some(client_id);

		self
	}

	/// Sets the token file.
	pub fn with_token_file_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.token_file_path = Some(path.into());

		self
	}
}

struct FileAssertion {
	path: PathBuf,
	cached: Mutex<Option<(String, OffsetDateTime)>>,
}
impl FileAssertion {
	fn read(&self) -> Result<String> {
		let now = OffsetDateTime::now_utc();

		if let Some((assertion, read_at)) = &*self.cached.lock()
			&& now - *read_at < FILE_REFRESH
		{
			return Ok(assertion.clone());
		}

		let assertion = std::fs::read_to_string(&self.path)
			.map_err(|e| {
				Error::authentication_failed(
					NAME,
					format!("failed to read {}: {e}", self.path.display()),
				)
			})?
			.trim()
			.to_owned();

		if assertion.is_empty() {
			return Err(Error::authentication_failed(
				NAME,
				format!("{} is empty", self.path.display()),
			));
		}

		*self.cached.lock() = Some((assertion.clone(), now));

		Ok(assertion)
	}
}
impl ClientAssertion for FileAssertion {
	fn assertion<'a>(&'a self, _: &'a Url) -> AssertionFuture<'a> {
		Box::pin(async move { self.read() })
	}
}

/// Exchanges a federated service account token for an Entra token.
#[derive(Debug)]
pub struct WorkloadIdentityCredential {
	client: ConfidentialClient,
	token_file: PathBuf,
}
impl WorkloadIdentityCredential {
	/// Creates a credential from `options`, reading missing values from the process environment.
	pub fn new(options: WorkloadIdentityOptions) -> Result<Self> {
		Self::from_env(&Env::process(), options)
	}

	/// Creates a credential from `options`, reading missing values from `env`.
	///
	/// Incomplete configuration is reported as [`Error::CredentialUnavailable`].
	pub fn from_env(env: &Env, options: WorkloadIdentityOptions) -> Result<Self> {
		let tenant_id = match options.tenant_id {
			Some(tenant_id) => tenant_id,
			None => TenantId::new(required(env, config::AZURE_TENANT_ID)?).map_err(|e| {
				Error::unavailable(NAME, format!("{} is invalid: {e}", config::AZURE_TENANT_ID))
			})?,
		};
		let client_id = match options.client_id {
			Some(client_id) => client_id,
			None => ClientId::new(required(env, config::AZURE_CLIENT_ID)?).map_err(|e| {
				Error::unavailable(NAME, format!("{} is invalid: {e}", config::AZURE_CLIENT_ID))
			})?,
		};
		let token_file = match options.token_file_path {
			Some(path) => path,
			None => PathBuf::from(required(env, config::AZURE_FEDERATED_TOKEN_FILE)?),
		};
		let assertion =
			Arc::new(FileAssertion { path: token_file.clone(), cached: Mutex::new(None) });

		Ok(Self {
			client: ConfidentialClient::new(
				NAME,
				tenant_id,
				client_id,
				ClientAuth::Assertion(assertion),
				&options.credential,
			),
			token_file,
		})
	}

	/// File the assertion is read from.
	pub fn token_file(&self) -> &Path {
		&self.token_file
	}
}
impl TokenCredential for WorkloadIdentityCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(NAME, "get_token", self.client.get_token(options)))
	}
}

fn required<'a>(env: &'a Env, name: &'static str) -> Result<&'a str> {
	env.get(name).ok_or_else(|| {
		Error::unavailable(
			NAME,
			format!("no {name} specified. Check pod configuration or set {name} in options"),
		)
	})
}
