//! Service principal configured through environment variables.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, TenantId, TokenRequestOptions},
	config::{self, Env},
	credential::{
		ClientCertificate, ClientCertificateCredential, ClientSecretCredential, CredentialOptions,
		TokenCredential, TokenFuture,
	},
	obs,
};

const NAME: &str = "EnvironmentCredential";

#[derive(Debug)]
enum Inner {
	Secret(ClientSecretCredential),
	Certificate(ClientCertificateCredential),
}

/// Reads a service principal from the environment.
///
/// Requires `AZURE_TENANT_ID` and `AZURE_CLIENT_ID` plus either `AZURE_CLIENT_SECRET` or
/// `AZURE_CLIENT_CERTIFICATE_PATH` (PEM). A secret wins when both are set. Setting
/// `AZURE_CLIENT_SEND_CERTIFICATE_CHAIN` sends the certificate chain with assertions.
#[derive(Debug)]
pub struct EnvironmentCredential {
	inner: Inner,
}
impl EnvironmentCredential {
	/// Creates a credential from the process environment.
	pub fn new(options: CredentialOptions) -> Result<Self> {
		Self::from_env(&Env::process(), options)
	}

	/// Creates a credential from `env`.
	///
	/// Incomplete configuration is reported as [`Error::CredentialUnavailable`].
	pub fn from_env(env: &Env, options: CredentialOptions) -> Result<Self> {
		let tenant =
			env.get(config::AZURE_TENANT_ID).ok_or_else(|| missing(config::AZURE_TENANT_ID))?;
		let tenant = TenantId::new(tenant).map_err(|e| invalid(config::AZURE_TENANT_ID, e))?;
		let client =
			env.get(config::AZURE_CLIENT_ID).ok_or_else(|| missing(config::AZURE_CLIENT_ID))?;
		let client = ClientId::new(client).map_err(|e| invalid(config::AZURE_CLIENT_ID, e))?;

		if let Some(secret) = env.get(config::AZURE_CLIENT_SECRET) {
			obs::event_debug!(credential = NAME, "Using client secret from the environment.");

			return Ok(Self {
				inner: Inner::Secret(ClientSecretCredential::new(
					tenant,
					client,
					secret.to_owned(),
					options,
				)),
			});
		}

		let Some(path) = env.get(config::AZURE_CLIENT_CERTIFICATE_PATH) else {
			return Err(Error::unavailable(
				NAME,
				format!(
					"missing environment variable {} or {}",
					config::AZURE_CLIENT_SECRET,
					config::AZURE_CLIENT_CERTIFICATE_PATH
				),
			));
		};

		if env.is_set(config::AZURE_CLIENT_CERTIFICATE_PASSWORD) {
			return Err(Error::unavailable(
				NAME,
				format!(
					"{} is set but password protected certificates are not supported",
					config::AZURE_CLIENT_CERTIFICATE_PASSWORD
				),
			));
		}

		let certificate = ClientCertificate::from_file(path)
			.map_err(|e| Error::unavailable(NAME, e.to_string()))?
			.with_send_chain(env.flag(config::AZURE_CLIENT_SEND_CERTIFICATE_CHAIN));

		obs::event_debug!(credential = NAME, "Using client certificate from the environment.");

		Ok(Self {
			inner: Inner::Certificate(ClientCertificateCredential::new(
				tenant,
				client,
				certificate,
				options,
			)),
		})
	}
}
impl TokenCredential for EnvironmentCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		match &self.inner {
			Inner::Secret(credential) => credential.get_token(options),
			Inner::Certificate(credential) => credential.get_token(options),
		}
	}
}

fn missing(name: &str) -> Error {
	Error::unavailable(NAME, format!("missing environment variable {name}"))
}

fn invalid(name: &str, e: impl Display) -> Error {
	Error::unavailable(NAME, format!("{name} is invalid: {e}"))
}
