//! Per-credential access token cache with single-flight refresh.
//!
//! Every credential owns one [`TokenCache`]. The cache keeps one [`TokenSyncer`] per
//! `(tenant, scopes, cae)` key so concurrent requests for the same token share a single fetch
//! while requests for different scopes proceed independently.
//!
//! Creating a syncer for a new key evicts idle syncers whose token has expired, so a
//! long-running process that rotates through many scope sets does not grow without bound.

mod metrics;
mod syncer;

pub use metrics::SyncMetrics;
pub use syncer::*;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ScopeSet},
};

/// Identifies one cached token.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
	/// Tenant the token was issued by.
	pub tenant: String,
	/// Normalized scopes.
	pub scopes: ScopeSet,
	/// Whether the token is CAE-capable.
	pub enable_cae: bool,
}
impl CacheKey {
	/// Builds a key.
	pub fn new(tenant: impl Into<String>, scopes: ScopeSet, enable_cae: bool) -> Self {
		Self { tenant: tenant.into(), scopes, enable_cae }
	}
}

/// Map of [`TokenSyncer`]s sharing a refresh window, backoff, and metrics sink.
#[derive(Debug)]
pub struct TokenCache {
	window: Duration,
	backoff: Duration,
	metrics: Arc<SyncMetrics>,
	syncers: Mutex<HashMap<CacheKey, Arc<TokenSyncer>>>,
}
impl TokenCache {
	/// Creates an empty cache with the default window and backoff.
	pub fn new() -> Self {
		Self {
			window: DEFAULT_REFRESH_WINDOW,
			backoff: DEFAULT_RETRY_BACKOFF,
			metrics: Default::default(),
			syncers: Default::default(),
		}
	}

	/// Overrides the refresh window for syncers created afterwards.
	pub fn with_refresh_window(mut self, window: Duration) -> Self {
		self.window = window;

		self
	}

	/// Overrides the eager refresh backoff for syncers created afterwards.
	pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
		self.backoff = backoff;

		self
	}

	/// Aggregated counters across all keys.
	pub fn metrics(&self) -> &SyncMetrics {
		&self.metrics
	}

	/// Number of keys currently tracked.
	pub fn len(&self) -> usize {
		self.syncers.lock().len()
	}

	/// Returns `true` when no key is tracked.
	pub fn is_empty(&self) -> bool {
		self.syncers.lock().is_empty()
	}

	/// Returns (and creates on demand) the syncer for `key`.
	pub fn syncer(&self, key: &CacheKey) -> Arc<TokenSyncer> {
		let mut syncers = self.syncers.lock();

		if let Some(syncer) = syncers.get(key) {
			return syncer.clone();
		}

		let now = OffsetDateTime::now_utc();

		// Only syncers nobody is waiting on are dropped.
		syncers.retain(|_, syncer| {
			Arc::strong_count(syncer) > 1
				|| syncer.cached().is_some_and(|token| !token.is_expired_at(now))
		});

		let syncer = Arc::new(
			TokenSyncer::new()
				.with_refresh_window(self.window)
				.with_retry_backoff(self.backoff)
				.with_metrics(self.metrics.clone()),
		);

		syncers.insert(key.clone(), syncer.clone());

		syncer
	}

	/// Returns the cached token for `key`, fetching through `fetch` when needed.
	///
	/// `force` bypasses freshness checks; claims challenges use it.
	pub async fn get_or_fetch<F, Fut>(
		&self,
		key: &CacheKey,
		force: bool,
		fetch: F,
	) -> Result<AccessToken>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<AccessToken>>,
	{
		let syncer = self.syncer(key);

		if force { syncer.refresh(fetch).await } else { syncer.get_token(fetch).await }
	}

	/// Drops every cached token.
	pub fn clear(&self) {
		self.syncers.lock().clear();
	}
}
impl Default for TokenCache {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;

	fn key(scope: &str) -> CacheKey {
		CacheKey::new(
			"tenant",
			ScopeSet::new([scope]).expect("Scope fixture should be valid."),
			false,
		)
	}

	#[tokio::test]
	async fn keys_are_isolated_and_reused() {
		let cache = TokenCache::new();
		let counter = AtomicUsize::new(0);
		let calls = &counter;
		let fetch = |value: &'static str| {
			move || async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Ok(AccessToken::new(value, OffsetDateTime::now_utc() + Duration::hours(1)))
			}
		};
		let vault = cache
			.get_or_fetch(&key("https://vault.azure.net/.default"), false, fetch("vault"))
			.await
			.expect("Vault token should be fetched.");
		let graph = cache
			.get_or_fetch(&key("https://graph.microsoft.com/.default"), false, fetch("graph"))
			.await
			.expect("Graph token should be fetched.");
		let vault_again = cache
			.get_or_fetch(&key("https://vault.azure.net/.default"), false, fetch("other"))
			.await
			.expect("Vault token should be served from cache.");

		assert_eq!(vault.token.expose(), "vault");
		assert_eq!(graph.token.expose(), "graph");
		assert_eq!(vault_again.token.expose(), "vault");
		assert_eq!(counter.load(Ordering::SeqCst), 2);
		assert_eq!(cache.metrics().fetches(), 2);
		assert_eq!(cache.metrics().hits(), 1);

		let forced = cache
			.get_or_fetch(&key("https://vault.azure.net/.default"), true, fetch("forced"))
			.await
			.expect("Forced fetch should run.");

		assert_eq!(forced.token.expose(), "forced");
		assert_eq!(counter.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn new_keys_evict_expired_tokens() {
		let cache = TokenCache::new();
		let lived = |value: &'static str, lifetime: Duration| {
			move || async move { Ok(AccessToken::new(value, OffsetDateTime::now_utc() + lifetime)) }
		};

		cache
			.get_or_fetch(
				&key("https://vault.azure.net/.default"),
				false,
				lived("vault", Duration::hours(1)),
			)
			.await
			.expect("Vault token should be fetched.");
		cache
			.get_or_fetch(
				&key("https://graph.microsoft.com/.default"),
				false,
				lived("graph", -Duration::seconds(1)),
			)
			.await
			.expect("An already expired token is still returned to its caller.");

		assert_eq!(cache.len(), 2);

		cache
			.get_or_fetch(
				&key("https://storage.azure.com/.default"),
				false,
				lived("storage", Duration::hours(1)),
			)
			.await
			.expect("Storage token should be fetched.");

		assert_eq!(cache.len(), 2);
		assert!(cache.syncers.lock().contains_key(&key("https://vault.azure.net/.default")));
		assert!(!cache.syncers.lock().contains_key(&key("https://graph.microsoft.com/.default")));
	}
}
