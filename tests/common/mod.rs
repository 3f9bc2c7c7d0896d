//! Helpers shared by the integration tests.

#![allow(dead_code)]

// crates.io
use httpmock::MockServer;
// self
use azure_identity_broker::{
	authority::AuthorityHost,
	credential::CredentialOptions,
	policy::RetryOptions,
	reqwest::Client,
};

/// reqwest client that accepts the self-signed certificates `httpmock` serves.
pub fn insecure_client() -> Client {
	Client::builder()
		.danger_accept_invalid_certs(true)
		.danger_accept_invalid_hostnames(true)
		.build()
		.expect("Failed to build insecure Reqwest client for tests.")
}

/// Authority host pointing at `server`.
pub fn authority(server: &MockServer) -> AuthorityHost {
	AuthorityHost::parse(&server.base_url().replacen("http://", "https://", 1))
		.expect("Mock authority host should parse.")
}

/// Credential options sending every identity request to `server`, once.
pub fn credential_options(server: &MockServer) -> CredentialOptions {
	CredentialOptions::default()
		.with_authority_host(authority(server))
		.with_http_client(insecure_client())
		.with_retry(RetryOptions::none())
}

/// Token endpoint path for `tenant`.
pub fn token_path(tenant: &str) -> String {
	format!("/{tenant}/oauth2/v2.0/token")
}

/// Successful token endpoint body.
pub fn token_body(access_token: &str, expires_in: i64) -> serde_json::Value {
	serde_json::json!({
		"access_token": access_token,
		"token_type": "Bearer",
		"expires_in": expires_in,
	})
}
