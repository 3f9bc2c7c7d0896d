//! Client credentials authenticated by a caller-supplied assertion.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, TenantId, TokenRequestOptions},
	credential::{
		CredentialOptions, TokenCredential, TokenFuture,
		confidential::{ClientAuth, ConfidentialClient},
	},
	obs,
};

const NAME: &str = "ClientAssertionCredential";

/// Boxed future returned by [`ClientAssertion::assertion`].
pub type AssertionFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + 'a + Send>>;

/// Produces signed JWT client assertions.
pub trait ClientAssertion
where
	Self: Send + Sync,
{
	/// Returns an assertion for `audience` (the token endpoint).
	fn assertion<'a>(&'a self, audience: &'a Url) -> AssertionFuture<'a>;
}

struct CallbackAssertion<F>(F);
impl<F, Fut> ClientAssertion for CallbackAssertion<F>
where
	F: Fn() -> Fut + Send + Sync,
	Fut: 'static + Future<Output = Result<String>> + Send,
{
	fn assertion<'a>(&'a self, _: &'a Url) -> AssertionFuture<'a> {
		Box::pin((self.0)())
	}
}

/// Authenticates a service principal with assertions from a callback.
///
/// The callback runs for every token request that misses the cache, so it should return a
/// fresh assertion each time.
#[derive(Debug)]
pub struct ClientAssertionCredential {
	client: ConfidentialClient,
}
impl ClientAssertionCredential {
	/// Creates a credential calling `assertion` for each token request.
	pub fn new<F, Fut>(
		tenant_id: TenantId,
		client_id: ClientId,
		assertion: F,
		options: CredentialOptions,
	) -> Self
	where
		F: 'static + Fn() -> Fut + Send + Sync,
		Fut: 'static + Future<Output = Result<String>> + Send,
	{
		Self::with_assertion(tenant_id, client_id, Arc::new(CallbackAssertion(assertion)), options)
	}

	/// Creates a credential from any [`ClientAssertion`] implementation.
	pub fn with_assertion(
		tenant_id: TenantId,
		client_id: ClientId,
		assertion: Arc<dyn ClientAssertion>,
		options: CredentialOptions,
	) -> Self {
		Self {
			client: ConfidentialClient::new(
				NAME,
				tenant_id,
				client_id,
				ClientAuth::Assertion(assertion),
				&options,
			),
		}
	}
}
impl TokenCredential for ClientAssertionCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(NAME, "get_token", self.client.get_token(options)))
	}
}
