//! Token family: which application, in which tenant, a persisted token belongs to.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, TenantId},
};

/// Groups persisted tokens by tenant and application so refresh tokens are never mixed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenFamily {
	/// Tenant that issued the tokens.
	pub tenant: TenantId,
	/// Application the tokens were issued to.
	pub client: ClientId,
}
impl TokenFamily {
	/// Creates a family for the provided tenant and client.
	pub fn new(tenant: TenantId, client: ClientId) -> Self {
		Self { tenant, client }
	}
}
