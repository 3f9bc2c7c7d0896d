//! Optional observability hooks for credentials.
//!
//! # Feature Flags
//!
//! - `tracing` wraps every token request in an `azure_identity.token` span carrying the
//!   `credential` name, the `stage` (call site) and the final `outcome`, and turns the crate's
//!   debug/warn events on.
//! - `metrics` increments `azure_identity_token_total`, labeled by `credential` + `outcome`.
//!
//! Without either feature the hooks compile to nothing.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

macro_rules! event_debug {
	($($arg:tt)*) => {{
		#[cfg(feature = "tracing")]
		::tracing::debug!($($arg)*);
	}};
}
pub(crate) use event_debug;

macro_rules! event_warn {
	($($arg:tt)*) => {{
		#[cfg(feature = "tracing")]
		::tracing::warn!($($arg)*);
	}};
}
pub(crate) use event_warn;

/// Outcome labels recorded for each token request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenOutcome {
	/// A credential started acquiring a token.
	Attempt,
	/// A token was returned.
	Success,
	/// The credential could not run in this environment.
	Unavailable,
	/// The credential ran and failed.
	Failure,
}
impl TokenOutcome {
	/// Classifies a token result.
	pub fn of<T>(result: &Result<T>) -> Self {
		match result {
			Ok(_) => Self::Success,
			Err(e) if e.is_unavailable() => Self::Unavailable,
			Err(_) => Self::Failure,
		}
	}

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			TokenOutcome::Attempt => "attempt",
			TokenOutcome::Success => "success",
			TokenOutcome::Unavailable => "unavailable",
			TokenOutcome::Failure => "failure",
		}
	}
}
impl Display for TokenOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Runs `fut` inside a token span and records attempt and outcome metrics for `credential`.
pub async fn observe<T, Fut>(credential: &'static str, stage: &'static str, fut: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	record_token_outcome(credential, TokenOutcome::Attempt);

	let span = TokenSpan::new(credential, stage);
	let result = span.instrument(fut).await;
	let outcome = TokenOutcome::of(&result);

	span.record_outcome(outcome);
	record_token_outcome(credential, outcome);

	if let Err(e) = &result {
		match outcome {
			TokenOutcome::Unavailable => {
				event_debug!(credential, error = %e, "Credential unavailable.")
			},
			_ => event_warn!(credential, error = %e, "Token request failed."),
		}
	}

	result
}
