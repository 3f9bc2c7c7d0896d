//! Per-request token options.

// self
use crate::{_prelude::*, auth::ScopeSet, error::ConfigError};

/// What a caller asks a credential for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenRequestOptions {
	/// Requested scopes, e.g. `https://management.azure.com/.default`.
	pub scopes: Vec<String>,
	/// Tenant override; must be allowed by the credential.
	pub tenant_id: Option<String>,
	/// Additional claims (JSON) demanded by a claims challenge.
	pub claims: Option<String>,
	/// Request a token that supports continuous access evaluation.
	pub enable_cae: bool,
}
impl TokenRequestOptions {
	/// Creates options for the provided scopes.
	pub fn new<I, S>(scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self { scopes: scopes.into_iter().map(Into::into).collect(), ..Default::default() }
	}

	/// Sets the tenant override.
	pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
		self.tenant_id = Some(tenant.into());

		self
	}

	/// Sets the claims demanded by a challenge.
	pub fn with_claims(mut self, claims: impl Into<String>) -> Self {
		self.claims = Some(claims.into());

		self
	}

	/// Toggles continuous access evaluation.
	pub fn with_cae(mut self, enable: bool) -> Self {
		self.enable_cae = enable;

		self
	}

	/// Normalizes the requested scopes into a [`ScopeSet`].
	pub fn scope_set(&self) -> Result<ScopeSet, ConfigError> {
		Ok(ScopeSet::new(self.scopes.iter().cloned())?)
	}

	/// Returns the explicit tenant override, ignoring empty strings.
	pub fn tenant(&self) -> Option<&str> {
		self.tenant_id.as_deref().filter(|tenant| !tenant.is_empty())
	}

	/// Returns the claims, ignoring empty strings.
	pub fn claims(&self) -> Option<&str> {
		self.claims.as_deref().filter(|claims| !claims.is_empty())
	}
}
