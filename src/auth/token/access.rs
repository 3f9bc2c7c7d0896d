//! Bearer access tokens handed to callers.

// self
use crate::{
	_prelude::*,
	auth::{TokenRecord, TokenSecret},
};

/// How close an access token is to expiry, relative to a refresh window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
	/// More than the refresh window remains; use as-is.
	Fresh,
	/// Still valid but inside the refresh window; refresh eagerly if nobody else is.
	Refreshable,
	/// At or past expiry; must not be used.
	Expired,
}

/// Access token plus its absolute expiry.
///
/// Never attach one to a plain HTTP request; the bearer policy enforces that.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
	/// The bearer token.
	pub token: TokenSecret,
	/// Absolute expiry instant.
	pub expires_on: OffsetDateTime,
}
impl AccessToken {
	/// Creates a new access token.
	pub fn new(token: impl Into<String>, expires_on: OffsetDateTime) -> Self {
		Self { token: TokenSecret::new(token), expires_on }
	}

	/// Lifetime left at `now` (negative once expired).
	pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
		self.expires_on - now
	}

	/// Classifies the token at `now` against `window`.
	///
	/// Only a remaining lifetime at or below `window` counts as refreshable, never earlier.
	pub fn freshness_at(&self, now: OffsetDateTime, window: Duration) -> Freshness {
		let remaining = self.remaining_at(now);

		if remaining <= Duration::ZERO {
			Freshness::Expired
		} else if remaining <= window {
			Freshness::Refreshable
		} else {
			Freshness::Fresh
		}
	}

	/// Returns `true` once `now` reaches the expiry instant.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		matches!(self.freshness_at(now, Duration::ZERO), Freshness::Expired)
	}
}
impl From<&TokenRecord> for AccessToken {
	fn from(record: &TokenRecord) -> Self {
		Self { token: record.access_token.clone(), expires_on: record.expires_at }
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("token", &self.token)
			.field("expires_on", &self.expires_on)
			.finish()
	}
}
