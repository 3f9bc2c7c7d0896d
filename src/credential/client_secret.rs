//! Service principal authentication with a client secret.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, TenantId, TokenRequestOptions, TokenSecret},
	credential::{
		CredentialOptions, TokenCredential, TokenFuture,
		confidential::{ClientAuth, ConfidentialClient},
	},
	obs,
};

const NAME: &str = "ClientSecretCredential";

/// Client credentials grant with `client_secret` in the form body.
#[derive(Debug)]
pub struct ClientSecretCredential {
	client: ConfidentialClient,
}
impl ClientSecretCredential {
	/// Creates a credential for the application `client_id` in `tenant_id`.
	pub fn new(
		tenant_id: TenantId,
		client_id: ClientId,
		secret: impl Into<TokenSecret>,
		options: CredentialOptions,
	) -> Self {
		Self {
			client: ConfidentialClient::new(
				NAME,
				tenant_id,
				client_id,
				ClientAuth::Secret(secret.into()),
				&options,
			),
		}
	}

	/// Tenant tokens are requested from by default.
	pub fn tenant_id(&self) -> &TenantId {
		self.client.tenant()
	}
}
impl TokenCredential for ClientSecretCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(NAME, "get_token", self.client.get_token(options)))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::ConfigError;

	fn credential() -> ClientSecretCredential {
		ClientSecretCredential::new(
			TenantId::new("home").expect("Tenant fixture should be valid."),
			ClientId::new("client").expect("Client fixture should be valid."),
			TokenSecret::new("secret"),
			CredentialOptions::default(),
		)
	}

	#[tokio::test]
	async fn disallowed_tenant_fails_before_any_request() {
		let options =
			TokenRequestOptions::new(["https://vault.azure.net/.default"]).with_tenant("other");
		let err = credential()
			.get_token(&options)
			.await
			.expect_err("Tenants outside the allow list must be rejected.");

		assert!(matches!(err, Error::Config(ConfigError::TenantNotAllowed { .. })));
	}

	#[tokio::test]
	async fn empty_scopes_are_rejected() {
		let err = credential()
			.get_token(&TokenRequestOptions::default())
			.await
			.expect_err("A token request needs a scope.");

		assert!(matches!(err, Error::Config(ConfigError::InvalidScope(_))));
	}

	#[test]
	fn debug_does_not_leak_the_secret() {
		let rendered = format!("{:?}", credential());

		assert!(!rendered.contains("\"secret\""));
		assert_eq!(credential().tenant_id().as_str(), "home");
	}
}
