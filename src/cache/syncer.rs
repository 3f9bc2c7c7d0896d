//! Single-flight synchronization around one cached access token.
//!
//! A [`TokenSyncer`] decides, per call, between three outcomes:
//!
//! - the cached token has more than the refresh window left: return it;
//! - it is inside the window: one caller wins an atomic flag and refreshes while everyone else
//!   keeps using the still-valid token;
//! - it is missing or expired: callers queue on an async gate, the first one fetches, and the
//!   rest pick up its result.
//!
//! A failed fetch is returned only to the caller that ran it. The cached token stays in place.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Freshness},
	cache::SyncMetrics,
};

/// Lookahead before expiry at which a refresh is triggered.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::minutes(2);
/// Minimum spacing between eager refresh attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::seconds(30);

#[derive(Debug, Default)]
struct SyncState {
	token: Option<AccessToken>,
	last_attempt: Option<OffsetDateTime>,
}

/// Serializes refreshes of one access token.
#[derive(Debug)]
pub struct TokenSyncer {
	window: Duration,
	backoff: Duration,
	state: RwLock<SyncState>,
	updating: AtomicBool,
	gate: AsyncMutex<()>,
	metrics: Arc<SyncMetrics>,
}
impl TokenSyncer {
	/// Creates a syncer with the default window and backoff.
	pub fn new() -> Self {
		Self {
			window: DEFAULT_REFRESH_WINDOW,
			backoff: DEFAULT_RETRY_BACKOFF,
			state: Default::default(),
			updating: AtomicBool::new(false),
			gate: AsyncMutex::new(()),
			metrics: Default::default(),
		}
	}

	/// Overrides the refresh window (negative values clamp to zero).
	pub fn with_refresh_window(mut self, window: Duration) -> Self {
		self.window = window.max(Duration::ZERO);

		self
	}

	/// Overrides the minimum spacing between eager refresh attempts.
	pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
		self.backoff = backoff.max(Duration::ZERO);

		self
	}

	/// Shares a metrics sink with other syncers.
	pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
		self.metrics = metrics;

		self
	}

	/// Configured refresh window.
	pub fn refresh_window(&self) -> Duration {
		self.window
	}

	/// Counters for this syncer.
	pub fn metrics(&self) -> &SyncMetrics {
		&self.metrics
	}

	/// Currently cached token, if any.
	pub fn cached(&self) -> Option<AccessToken> {
		self.state.read().token.clone()
	}

	/// Returns `true` while an eager refresh is running.
	pub fn is_updating(&self) -> bool {
		self.updating.load(Ordering::Acquire)
	}

	/// Seeds the cache, e.g. from a persisted record.
	pub fn prime(&self, token: AccessToken) {
		self.state.write().token = Some(token);
	}

	/// Drops the cached token so the next call fetches.
	pub fn invalidate(&self) {
		self.state.write().token = None;
	}

	/// Returns a usable token, calling `fetch` at most once and only when needed.
	pub async fn get_token<F, Fut>(&self, fetch: F) -> Result<AccessToken>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<AccessToken>>,
	{
		let now = OffsetDateTime::now_utc();
		let (cached, last_attempt) = {
			let state = self.state.read();

			(state.token.clone(), state.last_attempt)
		};

		if let Some(token) = cached {
			match token.freshness_at(now, self.window) {
				Freshness::Fresh => {
					self.metrics.record_hit();

					return Ok(token);
				},
				Freshness::Refreshable => {
					if last_attempt.is_some_and(|at| now - at < self.backoff) {
						self.metrics.record_stale();

						return Ok(token);
					}

					let Some(_flag) = UpdateFlag::try_claim(&self.updating) else {
						self.metrics.record_stale();

						return Ok(token);
					};
					let _gate = self.gate.lock().await;

					if let Some(current) = self.usable(Freshness::Fresh) {
						return Ok(current);
					}

					return self.fetch_locked(fetch).await;
				},
				Freshness::Expired => {},
			}
		}

		let _gate = self.gate.lock().await;

		// Whoever held the gate before may have stored a token already.
		if let Some(current) = self.usable(Freshness::Refreshable) {
			return Ok(current);
		}

		self.fetch_locked(fetch).await
	}

	/// Fetches a new token regardless of the cached one (claims challenges).
	pub async fn refresh<F, Fut>(&self, fetch: F) -> Result<AccessToken>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<AccessToken>>,
	{
		let _gate = self.gate.lock().await;

		self.fetch_locked(fetch).await
	}

	// Returns the cached token when it is at least as fresh as `floor`.
	fn usable(&self, floor: Freshness) -> Option<AccessToken> {
		let token = self.cached()?;
		let freshness = token.freshness_at(OffsetDateTime::now_utc(), self.window);
		let acceptable = match floor {
			Freshness::Fresh => freshness == Freshness::Fresh,
			Freshness::Refreshable => freshness != Freshness::Expired,
			Freshness::Expired => true,
		};

		if acceptable {
			self.metrics.record_hit();

			Some(token)
		} else {
			None
		}
	}

	async fn fetch_locked<F, Fut>(&self, fetch: F) -> Result<AccessToken>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<AccessToken>>,
	{
		self.metrics.record_fetch();

		let result = fetch().await;
		let mut state = self.state.write();

		state.last_attempt = Some(OffsetDateTime::now_utc());

		match result {
			Ok(token) => {
				state.token = Some(token.clone());

				Ok(token)
			},
			Err(e) => {
				self.metrics.record_failure();

				Err(e)
			},
		}
	}
}
impl Default for TokenSyncer {
	fn default() -> Self {
		Self::new()
	}
}

// Clears the updating flag on drop, including when the refreshing future is cancelled.
struct UpdateFlag<'a>(&'a AtomicBool);
impl<'a> UpdateFlag<'a> {
	fn try_claim(flag: &'a AtomicBool) -> Option<Self> {
		flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| Self(flag))
	}
}
impl Drop for UpdateFlag<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// self
	use super::*;

	fn token(value: &str, lifetime: Duration) -> AccessToken {
		AccessToken::new(value, OffsetDateTime::now_utc() + lifetime)
	}

	#[tokio::test]
	async fn fresh_token_skips_fetch() {
		let syncer = TokenSyncer::new();

		syncer.prime(token("cached", Duration::hours(1)));

		let got = syncer
			.get_token(|| async { Err(Error::authentication_failed("Test", "unexpected fetch")) })
			.await
			.expect("Fresh token should be returned.");

		assert_eq!(got.token.expose(), "cached");
		assert_eq!(syncer.metrics().fetches(), 0);
		assert_eq!(syncer.metrics().hits(), 1);
	}

	#[tokio::test]
	async fn refresh_only_inside_window() {
		let syncer = TokenSyncer::new().with_refresh_window(Duration::minutes(2));

		syncer.prime(token("outside", Duration::minutes(2) + Duration::seconds(30)));

		let got = syncer
			.get_token(|| async { Ok(token("unused", Duration::hours(1))) })
			.await
			.expect("Token outside the window should be reused.");

		assert_eq!(got.token.expose(), "outside");

		syncer.prime(token("inside", Duration::minutes(1)));

		let got = syncer
			.get_token(|| async { Ok(token("renewed", Duration::hours(1))) })
			.await
			.expect("Token inside the window should be refreshed.");

		assert_eq!(got.token.expose(), "renewed");
		assert_eq!(syncer.metrics().fetches(), 1);
	}

	#[tokio::test]
	async fn failed_refresh_keeps_cached_token_and_clears_flag() {
		let syncer = TokenSyncer::new().with_retry_backoff(Duration::ZERO);

		syncer.prime(token("stale", Duration::seconds(30)));

		let err = syncer
			.get_token(|| async { Err(Error::authentication_failed("Test", "rejected")) })
			.await
			.expect_err("The refreshing caller should observe the failure.");

		assert!(matches!(err, Error::AuthenticationFailed(_)));
		assert!(!syncer.is_updating());
		assert_eq!(
			syncer.cached().map(|t| t.token.expose().to_owned()),
			Some("stale".into())
		);

		let got = syncer
			.get_token(|| async { Ok(token("recovered", Duration::hours(1))) })
			.await
			.expect("A later caller should retry the refresh.");

		assert_eq!(got.token.expose(), "recovered");
	}

	#[tokio::test]
	async fn backoff_spaces_eager_refresh_attempts() {
		let syncer = TokenSyncer::new().with_retry_backoff(Duration::minutes(5));

		syncer.prime(token("stale", Duration::seconds(60)));

		let _ = syncer.get_token(|| async { Err(Error::authentication_failed("Test", "x")) }).await;
		let got = syncer
			.get_token(|| async { Err(Error::authentication_failed("Test", "unexpected fetch")) })
			.await
			.expect("Stale token should be served during backoff.");

		assert_eq!(got.token.expose(), "stale");
		assert_eq!(syncer.metrics().fetches(), 1);
		assert_eq!(syncer.metrics().stale_reuses(), 1);
	}

	#[tokio::test]
	async fn expired_token_blocks_until_fetched() {
		let syncer = TokenSyncer::new();
		let counter = AtomicUsize::new(0);
		let calls = &counter;

		syncer.prime(token("expired", -Duration::seconds(1)));

		let got = syncer
			.get_token(move || async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Ok(token("new", Duration::hours(1)))
			})
			.await
			.expect("Expired token should be replaced.");

		assert_eq!(got.token.expose(), "new");
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn forced_refresh_ignores_freshness() {
		let syncer = TokenSyncer::new();

		syncer.prime(token("fresh", Duration::hours(1)));

		let got = syncer
			.refresh(|| async { Ok(token("claims", Duration::hours(1))) })
			.await
			.expect("Forced refresh should fetch.");

		assert_eq!(got.token.expose(), "claims");
		assert_eq!(syncer.cached().map(|t| t.token), Some(got.token));
	}
}
