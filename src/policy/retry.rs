//! Exponential retry with jitter for outbound requests.

// crates.io
use rand::Rng;
use reqwest::{
	Request, Response,
	header::{HeaderMap, RETRY_AFTER},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, obs};

const RETRY_AFTER_MS: &str = "retry-after-ms";
const X_MS_RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";

/// Retry behavior for token endpoint and service requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryOptions {
	/// Retries after the first attempt. Zero disables retries.
	pub max_retries: u32,
	/// Base delay; retry `n` waits roughly `(2^n - 1) * retry_delay`.
	pub retry_delay: StdDuration,
	/// Upper bound for a computed delay.
	pub max_retry_delay: StdDuration,
	/// Per-attempt timeout.
	pub try_timeout: Option<StdDuration>,
	/// Response statuses worth retrying.
	pub status_codes: Vec<u16>,
}
impl RetryOptions {
	/// Options that send each request exactly once.
	pub fn none() -> Self {
		Self { max_retries: 0, ..Default::default() }
	}

	/// Sets the number of retries.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;

		self
	}

	/// Sets the base delay.
	pub fn with_retry_delay(mut self, delay: StdDuration) -> Self {
		self.retry_delay = delay;

		self
	}

	/// Sets the delay cap.
	pub fn with_max_retry_delay(mut self, delay: StdDuration) -> Self {
		self.max_retry_delay = delay;

		self
	}

	/// Sets the per-attempt timeout.
	pub fn with_try_timeout(mut self, timeout: StdDuration) -> Self {
		self.try_timeout = Some(timeout);

		self
	}

	/// Returns `true` if a response with `status` should be retried.
	pub fn retries_status(&self, status: u16) -> bool {
		self.status_codes.contains(&status)
	}

	/// Jittered delay before retry number `attempt` (1-based), capped at `max_retry_delay`.
	pub fn delay_for(&self, attempt: u32) -> StdDuration {
		let jitter = rand::rng().random_range(0.8..1.3);

		self.scaled_delay(attempt, jitter)
	}

	fn scaled_delay(&self, attempt: u32, jitter: f64) -> StdDuration {
		let exponent = attempt.clamp(1, 30) as i32;
		let secs = self.retry_delay.as_secs_f64() * (2_f64.powi(exponent) - 1.) * jitter;

		StdDuration::from_secs_f64(secs.min(self.max_retry_delay.as_secs_f64()))
	}
}
impl Default for RetryOptions {
	fn default() -> Self {
		Self {
			max_retries: 3,
			retry_delay: StdDuration::from_millis(800),
			max_retry_delay: StdDuration::from_secs(60),
			try_timeout: None,
			status_codes: vec![408, 429, 500, 502, 503, 504],
		}
	}
}

/// Sends `request`, retrying transport failures and retriable statuses.
///
/// Requests whose body cannot be cloned are sent once. The final response is returned as-is,
/// whatever its status.
pub async fn send_with_retry(
	client: &ReqwestClient,
	request: Request,
	options: &RetryOptions,
) -> Result<Response, ReqwestError> {
	let mut attempt = 0;

	loop {
		let Some(mut current) = request.try_clone() else {
			return client.execute(request).await;
		};

		if let Some(timeout) = options.try_timeout {
			*current.timeout_mut() = Some(timeout);
		}

		let outcome = client.execute(current).await;
		// `Some(hint)` means the outcome is retriable; `hint` is the server's requested delay.
		let decision = match &outcome {
			Ok(response) if options.retries_status(response.status().as_u16()) =>
				Some(retry_after(response.headers())),
			Err(e) if e.is_timeout() || e.is_connect() => Some(None),
			_ => None,
		};
		let Some(hint) = decision else {
			return outcome;
		};

		if attempt >= options.max_retries {
			return outcome;
		}

		attempt += 1;

		let delay = hint.unwrap_or_else(|| options.delay_for(attempt));

		obs::event_debug!(
			url = %request.url(),
			attempt,
			delay_ms = delay.as_millis() as u64,
			"Retrying request."
		);

		tokio::time::sleep(delay).await;
	}
}

/// Reads the server's retry hint from `retry-after-ms`, `x-ms-retry-after-ms` or `Retry-After`.
///
/// `Retry-After` may be delta seconds or an HTTP date.
pub fn retry_after(headers: &HeaderMap) -> Option<StdDuration> {
	for name in [RETRY_AFTER_MS, X_MS_RETRY_AFTER_MS] {
		if let Some(ms) = header_str(headers, name).and_then(|raw| raw.parse::<u64>().ok()) {
			return Some(StdDuration::from_millis(ms));
		}
	}

	let raw = header_str(headers, RETRY_AFTER.as_str())?;

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(StdDuration::from_secs(secs));
	}

	let moment = OffsetDateTime::parse(raw, &Rfc2822).ok()?;
	let delta = moment - OffsetDateTime::now_utc();

	if delta.is_positive() { StdDuration::try_from(delta).ok() } else { Some(StdDuration::ZERO) }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
	headers.get(name)?.to_str().ok().map(str::trim)
}

#[cfg(test)]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	#[test]
	fn delays_grow_exponentially_and_cap() {
		let options = RetryOptions::default();

		assert_eq!(options.scaled_delay(1, 1.), StdDuration::from_millis(800));
		assert_eq!(options.scaled_delay(2, 1.), StdDuration::from_millis(2_400));
		assert_eq!(options.scaled_delay(3, 1.), StdDuration::from_millis(5_600));
		assert_eq!(options.scaled_delay(20, 1.3), StdDuration::from_secs(60));

		for attempt in 1..=3 {
			let delay = options.delay_for(attempt);
			let base = options.scaled_delay(attempt, 1.);

			assert!(delay >= base.mul_f64(0.8) && delay < base.mul_f64(1.3));
		}
	}

	#[test]
	fn retry_after_prefers_millisecond_headers() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));

		assert_eq!(retry_after(&headers), Some(StdDuration::from_secs(7)));

		headers.insert(X_MS_RETRY_AFTER_MS, HeaderValue::from_static("250"));

		assert_eq!(retry_after(&headers), Some(StdDuration::from_millis(250)));
		assert_eq!(retry_after(&HeaderMap::new()), None);
	}

	#[test]
	fn retry_after_accepts_past_http_dates() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 +0000"));

		assert_eq!(retry_after(&headers), Some(StdDuration::ZERO));
	}

	#[test]
	fn default_statuses_match_transient_failures() {
		let options = RetryOptions::default();

		for status in [408, 429, 500, 502, 503, 504] {
			assert!(options.retries_status(status));
		}

		assert!(!options.retries_status(401));
		assert!(!options.retries_status(400));
		assert_eq!(RetryOptions::none().max_retries, 0);
	}
}
