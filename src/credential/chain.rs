//! Ordered fallback across credentials.

// std
use std::sync::OnceLock;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenRequestOptions},
	credential::{TokenCredential, TokenFuture},
	obs,
};

const NAME: &str = "ChainedTokenCredential";

/// Tries each source in order until one returns a token.
///
/// A source reporting [`Error::CredentialUnavailable`] is skipped. Any other error ends the
/// chain and is returned as-is. When every source is unavailable the returned error lists each
/// source and its reason.
pub struct ChainedTokenCredential {
	name: &'static str,
	sources: Vec<Arc<dyn TokenCredential>>,
	retry_sources: bool,
	selected: OnceLock<usize>,
}
impl ChainedTokenCredential {
	/// Creates a chain over `sources`.
	pub fn new(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
		Self { name: NAME, sources, retry_sources: false, selected: OnceLock::new() }
	}

	/// With `true`, every request walks the chain from the start instead of reusing the source
	/// that succeeded first.
	pub fn with_retry_sources(mut self, retry_sources: bool) -> Self {
		self.retry_sources = retry_sources;

		self
	}

	pub(crate) fn with_name(mut self, name: &'static str) -> Self {
		self.name = name;

		self
	}

	/// Sources in the order they are tried.
	pub fn sources(&self) -> &[Arc<dyn TokenCredential>] {
		&self.sources
	}

	/// Source that served the first successful request, once known.
	pub fn selected(&self) -> Option<&Arc<dyn TokenCredential>> {
		self.selected.get().and_then(|&index| self.sources.get(index))
	}

	async fn token(&self, options: &TokenRequestOptions) -> Result<AccessToken> {
		if !self.retry_sources
			&& let Some(source) = self.selected()
		{
			return source.get_token(options).await;
		}

		let mut attempts = Vec::new();

		for (index, source) in self.sources.iter().enumerate() {
			match source.get_token(options).await {
				Ok(token) => {
					if !self.retry_sources && self.selected.set(index).is_ok() {
						obs::event_debug!(
							credential = self.name,
							selected = source.name(),
							"Chain settled on a credential."
						);
					}

					return Ok(token);
				},
				Err(Error::CredentialUnavailable(e)) =>
					attempts.push(format!("{}: {}", source.name(), e.message)),
				Err(e) => return Err(e),
			}
		}

		Err(Error::unavailable(self.name, aggregate_message(&attempts)))
	}
}
impl Debug for ChainedTokenCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ChainedTokenCredential")
			.field("name", &self.name)
			.field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
			.field("retry_sources", &self.retry_sources)
			.field("selected", &self.selected.get())
			.finish()
	}
}
impl TokenCredential for ChainedTokenCredential {
	fn name(&self) -> &'static str {
		self.name
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(self.name, "get_token", self.token(options)))
	}
}

fn aggregate_message(attempts: &[String]) -> String {
	if attempts.is_empty() {
		return "no credentials in the chain".into();
	}

	let mut message = String::from("failed to acquire a token.\nAttempted credentials:");

	for attempt in attempts {
		message.push_str("\n\t");
		message.push_str(attempt);
	}

	message
}
