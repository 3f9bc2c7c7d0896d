//! Environment-driven configuration.
//!
//! Credentials read their environment through [`Env`], a snapshot taken once at construction.
//! Tests build an [`Env`] from pairs instead of mutating the process environment.

// self
use crate::_prelude::*;

/// Tenant for [`EnvironmentCredential`](crate::credential::EnvironmentCredential) and friends.
pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
/// Application (client) ID.
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
/// Client secret.
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
/// Path to a PEM file holding a certificate and its private key.
pub const AZURE_CLIENT_CERTIFICATE_PATH: &str = "AZURE_CLIENT_CERTIFICATE_PATH";
/// Password for an encrypted certificate (not supported, reported when set).
pub const AZURE_CLIENT_CERTIFICATE_PASSWORD: &str = "AZURE_CLIENT_CERTIFICATE_PASSWORD";
/// Send the `x5c` certificate chain with client assertions (`true`/`1`).
pub const AZURE_CLIENT_SEND_CERTIFICATE_CHAIN: &str = "AZURE_CLIENT_SEND_CERTIFICATE_CHAIN";
/// Entra authority host override.
pub const AZURE_AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";
/// Federated token file for workload identity.
pub const AZURE_FEDERATED_TOKEN_FILE: &str = "AZURE_FEDERATED_TOKEN_FILE";
/// Semicolon separated tenant allow list.
pub const AZURE_ADDITIONALLY_ALLOWED_TENANTS: &str = "AZURE_ADDITIONALLY_ALLOWED_TENANTS";
/// Restricts which credentials the default chain tries.
pub const AZURE_TOKEN_CREDENTIALS: &str = "AZURE_TOKEN_CREDENTIALS";
/// Managed identity endpoint (App Service 2019, Service Fabric, Azure Arc).
pub const IDENTITY_ENDPOINT: &str = "IDENTITY_ENDPOINT";
/// Managed identity header secret (App Service 2019, Service Fabric).
pub const IDENTITY_HEADER: &str = "IDENTITY_HEADER";
/// Service Fabric server certificate thumbprint.
pub const IDENTITY_SERVER_THUMBPRINT: &str = "IDENTITY_SERVER_THUMBPRINT";
/// Azure Arc IMDS endpoint marker.
pub const IMDS_ENDPOINT: &str = "IMDS_ENDPOINT";
/// Legacy managed identity endpoint (App Service 2017, Cloud Shell).
pub const MSI_ENDPOINT: &str = "MSI_ENDPOINT";
/// Legacy managed identity secret (App Service 2017).
pub const MSI_SECRET: &str = "MSI_SECRET";
/// IMDS host override used by AKS pod identity.
pub const AZURE_POD_IDENTITY_AUTHORITY_HOST: &str = "AZURE_POD_IDENTITY_AUTHORITY_HOST";

/// Snapshot of environment variables.
///
/// Empty values are treated as unset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Env {
	vars: HashMap<String, String>,
}
impl Env {
	/// Captures the current process environment, skipping non-UTF-8 entries.
	pub fn process() -> Self {
		let vars = std::env::vars_os()
			.filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
			.collect();

		Self { vars }
	}

	/// Builds a snapshot from explicit pairs.
	pub fn from_pairs<I, K, V>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self { vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
	}

	/// Adds or replaces one variable.
	pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.vars.insert(name.into(), value.into());

		self
	}

	/// Returns a non-empty variable value.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.vars.get(name).map(String::as_str).filter(|value| !value.is_empty())
	}

	/// Returns `true` when the variable holds a non-empty value.
	pub fn is_set(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	/// Splits a `;` separated list, trimming entries and dropping empties.
	pub fn list(&self, name: &str) -> Vec<String> {
		self.get(name)
			.map(|raw| {
				raw.split(';').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
			})
			.unwrap_or_default()
	}

	/// Interprets `true`/`1` (case-insensitive) as enabled.
	pub fn flag(&self, name: &str) -> bool {
		self.get(name).is_some_and(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
	}
}
