// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing how token requests were served.
#[derive(Debug, Default)]
pub struct SyncMetrics {
	fetches: AtomicU64,
	hits: AtomicU64,
	stale: AtomicU64,
	failures: AtomicU64,
}
impl SyncMetrics {
	/// Calls made to the underlying token source.
	pub fn fetches(&self) -> u64 {
		self.fetches.load(Ordering::Relaxed)
	}

	/// Requests answered from a fresh cached token.
	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	/// Requests answered with a token inside the refresh window while another caller refreshed.
	pub fn stale_reuses(&self) -> u64 {
		self.stale.load(Ordering::Relaxed)
	}

	/// Fetches that returned an error.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	pub(crate) fn record_fetch(&self) {
		self.fetches.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_hit(&self) {
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_stale(&self) {
		self.stale.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failures.fetch_add(1, Ordering::Relaxed);
	}
}
