//! Outbound HTTP pipeline: retries plus optional bearer authorization.

pub mod bearer;
pub mod challenge;
pub mod retry;

pub use bearer::*;
pub use retry::{RetryOptions, send_with_retry};

// crates.io
use reqwest::{Request, Response};
// self
use crate::{_prelude::*, error::TransportError};

/// reqwest client wrapped with retry and an optional [`BearerTokenPolicy`].
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
	client: ReqwestClient,
	retry: RetryOptions,
	bearer: Option<Arc<BearerTokenPolicy>>,
}
impl Pipeline {
	/// Builds an unauthenticated pipeline around `client`.
	pub fn new(client: ReqwestClient) -> Self {
		Self { client, retry: RetryOptions::default(), bearer: None }
	}

	/// Overrides the retry options.
	pub fn with_retry(mut self, retry: RetryOptions) -> Self {
		self.retry = retry;

		self
	}

	/// Authorizes every request with `policy`.
	pub fn with_bearer(mut self, policy: BearerTokenPolicy) -> Self {
		self.bearer = Some(Arc::new(policy));

		self
	}

	/// Borrows the wrapped client, e.g. to build requests.
	pub fn client(&self) -> &ReqwestClient {
		&self.client
	}

	/// Sends `request` through the policies.
	pub async fn send(&self, request: Request) -> Result<Response> {
		match &self.bearer {
			Some(policy) => policy.send(&self.client, &self.retry, request).await,
			None => send_with_retry(&self.client, request, &self.retry)
				.await
				.map_err(|e| TransportError::network("the service endpoint", e).into()),
		}
	}
}
