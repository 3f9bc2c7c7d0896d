//! Persisted token records for public client credentials that hold refresh tokens.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ScopeSet, TokenFamily, TokenSecret},
};

/// Where a stored record is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Access token is currently valid.
	Active,
	/// Access token passed its expiry instant; the refresh token may still work.
	Expired,
	/// Record was revoked after Entra rejected its refresh token.
	Revoked,
}

/// Access and refresh tokens issued to one family for one scope set.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenRecord {
	/// Tenant + client the tokens belong to.
	pub family: TokenFamily,
	/// Normalized scopes the record was requested for.
	pub scope: ScopeSet,
	/// Access token secret.
	pub access_token: TokenSecret,
	/// Refresh token secret, if Entra issued one.
	pub refresh_token: Option<TokenSecret>,
	/// When the token endpoint answered.
	pub issued_at: OffsetDateTime,
	/// Access token expiry.
	pub expires_at: OffsetDateTime,
	/// Revocation instant if the record has been revoked.
	pub revoked_at: Option<OffsetDateTime>,
}
impl TokenRecord {
	/// Records `access` as issued now, without a refresh token.
	pub fn new(family: TokenFamily, scope: ScopeSet, access: AccessToken) -> Self {
		Self {
			family,
			scope,
			access_token: access.token,
			refresh_token: None,
			issued_at: OffsetDateTime::now_utc(),
			expires_at: access.expires_on,
			revoked_at: None,
		}
	}

	/// Attaches the refresh token Entra returned alongside the access token.
	pub fn with_refresh_token(mut self, token: impl Into<TokenSecret>) -> Self {
		self.refresh_token = Some(token.into());

		self
	}

	/// Overrides the issue instant.
	pub fn with_issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = instant;

		self
	}

	/// Status of the record at `instant`; revocation wins over expiry.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		match self.revoked_at {
			Some(_) => TokenStatus::Revoked,
			None if instant >= self.expires_at => TokenStatus::Expired,
			None => TokenStatus::Active,
		}
	}

	/// Returns `true` if the record has been revoked.
	pub fn is_revoked(&self) -> bool {
		self.revoked_at.is_some()
	}

	/// Marks the record as revoked.
	pub fn revoke(&mut self, instant: OffsetDateTime) {
		self.revoked_at = Some(instant);
	}

	/// Copies the access token half of the record.
	pub fn access(&self) -> AccessToken {
		AccessToken::from(self)
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("family", &self.family)
			.field("scope", &self.scope)
			.field("has_refresh_token", &self.refresh_token.is_some())
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("revoked_at", &self.revoked_at)
			.finish_non_exhaustive()
	}
}
