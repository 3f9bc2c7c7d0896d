//! Entra authority hosts, endpoint derivation, and tenant resolution.

// self
use crate::{
	_prelude::*,
	auth::TenantId,
	config::{self, Env},
	error::ConfigError,
};

/// Azure public cloud authority.
pub const AZURE_PUBLIC_CLOUD: &str = "https://login.microsoftonline.com/";
/// Azure China cloud authority.
pub const AZURE_CHINA: &str = "https://login.chinacloudapi.cn/";
/// Azure US Government cloud authority.
pub const AZURE_GOVERNMENT: &str = "https://login.microsoftonline.us/";

/// Validated HTTPS authority host with a trailing slash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorityHost(String);
impl AuthorityHost {
	/// Validates `url` and normalizes its path so endpoint joins append segments.
	pub fn new(mut url: Url) -> Result<Self, ConfigError> {
		if url.scheme() != "https" {
			return Err(ConfigError::InsecureEndpoint {
				endpoint: "authority",
				url: url.to_string(),
			});
		}
		if !url.path().ends_with('/') {
			let path = format!("{}/", url.path());

			url.set_path(&path);
		}

		url.set_query(None);
		url.set_fragment(None);

		Ok(Self(url.into()))
	}

	/// Parses and validates a raw authority host.
	pub fn parse(raw: &str) -> Result<Self, ConfigError> {
		let url = Url::parse(raw)
			.map_err(|source| ConfigError::InvalidUrl { what: "authority", source })?;

		Self::new(url)
	}

	/// Azure public cloud.
	pub fn public_cloud() -> Self {
		Self(AZURE_PUBLIC_CLOUD.into())
	}

	/// Reads `AZURE_AUTHORITY_HOST`, falling back to the public cloud.
	pub fn from_env(env: &Env) -> Result<Self, ConfigError> {
		match env.get(config::AZURE_AUTHORITY_HOST) {
			Some(raw) => Self::parse(raw),
			None => Ok(Self::public_cloud()),
		}
	}

	/// Returns the normalized host URL.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// `{host}/{tenant}/oauth2/v2.0/token`.
	pub fn token_endpoint(&self, tenant: &TenantId) -> Result<Url, ConfigError> {
		self.endpoint(tenant, "token")
	}

	/// `{host}/{tenant}/oauth2/v2.0/authorize`.
	pub fn authorize_endpoint(&self, tenant: &TenantId) -> Result<Url, ConfigError> {
		self.endpoint(tenant, "authorize")
	}

	/// `{host}/{tenant}/oauth2/v2.0/devicecode`.
	pub fn device_code_endpoint(&self, tenant: &TenantId) -> Result<Url, ConfigError> {
		self.endpoint(tenant, "devicecode")
	}

	fn endpoint(&self, tenant: &TenantId, leaf: &str) -> Result<Url, ConfigError> {
		Url::parse(&format!("{}{tenant}/oauth2/v2.0/{leaf}", self.0))
			.map_err(|source| ConfigError::InvalidUrl { what: "identity endpoint", source })
	}
}
impl Default for AuthorityHost {
	fn default() -> Self {
		Self::public_cloud()
	}
}
impl Display for AuthorityHost {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Picks the tenant for one request.
///
/// A requested tenant that differs from the credential's own tenant must be listed in
/// `allowed` (or `allowed` must contain `*`).
pub fn resolve_tenant(
	default: &TenantId,
	requested: Option<&str>,
	allowed: &[String],
) -> Result<TenantId, ConfigError> {
	let Some(requested) = requested.filter(|t| !t.is_empty() && *t != default.as_str()) else {
		return Ok(default.clone());
	};
	let tenant = TenantId::new(requested)?;

	if allowed.iter().any(|entry| entry == "*" || entry.eq_ignore_ascii_case(requested)) {
		Ok(tenant)
	} else {
		Err(ConfigError::TenantNotAllowed { tenant: requested.to_owned() })
	}
}
