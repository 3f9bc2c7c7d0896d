//! Acquires a service principal token from a mock Entra tenant and shows the second request
//! being served from the credential's cache.

// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
// self
use azure_identity_broker::{
	auth::{ClientId, TenantId, TokenRequestOptions, TokenSecret},
	authority::AuthorityHost,
	credential::{ClientSecretCredential, CredentialOptions, TokenCredential},
	reqwest::Client,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/contoso/oauth2/v2.0/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-access\",\"token_type\":\"Bearer\",\"expires_in\":3600}",
			);
		})
		.await;
	// The mock speaks TLS on the same port; authority hosts must be HTTPS.
	let authority = AuthorityHost::parse(&server.base_url().replacen("http://", "https://", 1))?;
	let options = CredentialOptions::default()
		.with_authority_host(authority)
		.with_http_client(
			Client::builder()
				.danger_accept_invalid_certs(true)
				.danger_accept_invalid_hostnames(true)
				.build()?,
		);
	let credential = ClientSecretCredential::new(
		TenantId::new("contoso")?,
		ClientId::new("demo-app")?,
		TokenSecret::new("super-secret"),
		options,
	);
	let request = TokenRequestOptions::new(["https://vault.azure.net/.default"]);
	let first = credential.get_token(&request).await?;
	let second = credential.get_token(&request).await?;

	println!("Access token: {}.", first.token.expose());
	println!("Expires on: {}.", second.expires_on);

	token_mock.assert_calls_async(1).await;

	Ok(())
}
