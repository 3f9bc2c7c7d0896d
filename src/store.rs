//! Persistence for refresh-token bearing records held by public client credentials.
//!
//! Device code and authorization code credentials save what Entra returns here and later
//! redeem the refresh token silently. Rotation goes through
//! [`TokenStore::compare_and_swap_refresh`] so two processes sharing a store never overwrite
//! each other's newer refresh token.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenFamily, TokenRecord, TokenSecret},
};

/// Boxed future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend for [`TokenRecord`]s keyed by family and scope.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the record for its family + scope.
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()>;

	/// Fetches the record for the family + scope, if present.
	fn fetch<'a>(
		&'a self,
		family: &'a TokenFamily,
		scope: &'a ScopeSet,
	) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Returns the most recently issued, unrevoked record of `family` that holds a refresh
	/// token, whatever its scope.
	///
	/// Entra refresh tokens are not bound to one resource, so this lets a credential
	/// authenticated for one scope silently acquire tokens for another.
	fn fetch_latest<'a>(&'a self, family: &'a TokenFamily) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Replaces the record only if its refresh token still equals `expected_refresh`.
	fn compare_and_swap_refresh<'a>(
		&'a self,
		family: &'a TokenFamily,
		scope: &'a ScopeSet,
		expected_refresh: Option<&'a str>,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;

	/// Marks the record as revoked at `instant`.
	fn revoke<'a>(
		&'a self,
		family: &'a TokenFamily,
		scope: &'a ScopeSet,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<TokenRecord>>;
}
impl Debug for dyn TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenStore(..)")
	}
}

/// Result of [`TokenStore::compare_and_swap_refresh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The expected refresh token matched and the record was replaced.
	Updated,
	/// A record exists but holds a different refresh token.
	RefreshMismatch,
	/// No record exists for the family + scope.
	Missing,
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Records could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// The storage backend failed.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Key identifying a stored record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
	/// Tenant + client.
	pub family: TokenFamily,
	/// [`ScopeSet::fingerprint`] of the record's scopes.
	pub scope_fingerprint: String,
}
impl StoreKey {
	/// Builds the key for `family` and `scope`.
	pub fn new(family: &TokenFamily, scope: &ScopeSet) -> Self {
		Self { family: family.clone(), scope_fingerprint: scope.fingerprint() }
	}
}

// Shared by the built-in stores, which keep everything in one map.
pub(crate) fn swap_in_map(
	map: &mut HashMap<StoreKey, TokenRecord>,
	key: StoreKey,
	expected_refresh: Option<&str>,
	replacement: TokenRecord,
) -> CompareAndSwapOutcome {
	let outcome = match map.get(&key) {
		Some(existing)
			if existing.refresh_token.as_ref().map(TokenSecret::expose) == expected_refresh =>
			CompareAndSwapOutcome::Updated,
		Some(_) => CompareAndSwapOutcome::RefreshMismatch,
		None => CompareAndSwapOutcome::Missing,
	};

	if outcome == CompareAndSwapOutcome::Updated {
		map.insert(key, replacement);
	}

	outcome
}

pub(crate) fn latest_in_map<'a>(
	map: impl IntoIterator<Item = &'a TokenRecord>,
	family: &TokenFamily,
) -> Option<TokenRecord> {
	map.into_iter()
		.filter(|record| &record.family == family)
		.filter(|record| !record.is_revoked() && record.refresh_token.is_some())
		.max_by_key(|record| record.issued_at)
		.cloned()
}
