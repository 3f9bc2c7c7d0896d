//! Bearer token authorization for outbound service requests.

// crates.io
use reqwest::{
	Request, Response, StatusCode,
	header::{AUTHORIZATION, HeaderValue},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenRequestOptions},
	cache::TokenSyncer,
	credential::TokenCredential,
	error::{ConfigError, TransportError},
	obs,
	policy::{RetryOptions, challenge, retry},
};

/// Options for [`BearerTokenPolicy`].
#[derive(Clone, Debug, Default)]
pub struct BearerTokenOptions {
	/// Permits attaching tokens to plain HTTP requests. Only meant for local test servers.
	pub insecure_allow_http: bool,
	/// Overrides the token refresh window.
	pub refresh_window: Option<Duration>,
}
impl BearerTokenOptions {
	/// Allows plain HTTP requests.
	pub fn with_insecure_allow_http(mut self, allow: bool) -> Self {
		self.insecure_allow_http = allow;

		self
	}

	/// Sets the token refresh window.
	pub fn with_refresh_window(mut self, window: Duration) -> Self {
		self.refresh_window = Some(window);

		self
	}
}

/// Attaches `Authorization: Bearer` headers using one credential and a fixed scope set.
///
/// Tokens are requested CAE-enabled. A `401` carrying an `insufficient_claims` challenge
/// triggers one forced refresh with the challenge's claims and a single resend.
pub struct BearerTokenPolicy {
	credential: Arc<dyn TokenCredential>,
	scopes: Vec<String>,
	syncer: TokenSyncer,
	options: BearerTokenOptions,
}
impl BearerTokenPolicy {
	/// Creates a policy requesting `scopes` from `credential`.
	pub fn new<I, S>(credential: Arc<dyn TokenCredential>, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			credential,
			scopes: scopes.into_iter().map(Into::into).collect(),
			syncer: TokenSyncer::new(),
			options: BearerTokenOptions::default(),
		}
	}

	/// Applies `options`.
	pub fn with_options(mut self, options: BearerTokenOptions) -> Self {
		if let Some(window) = options.refresh_window {
			self.syncer = TokenSyncer::new().with_refresh_window(window);
		}

		self.options = options;

		self
	}

	/// Scopes this policy requests.
	pub fn scopes(&self) -> &[String] {
		&self.scopes
	}

	/// Attaches a bearer token to `request`.
	pub async fn authorize(&self, request: &mut Request) -> Result<()> {
		self.ensure_tls(request)?;

		let token = self.syncer.get_token(|| self.fetch(None)).await?;

		set_bearer(request, &token)
	}

	/// Authorizes and sends `request`, answering one CAE claims challenge.
	pub async fn send(
		&self,
		client: &ReqwestClient,
		retry: &RetryOptions,
		mut request: Request,
	) -> Result<Response> {
		self.authorize(&mut request).await?;

		let replay = request.try_clone();
		let response = retry::send_with_retry(client, request, retry)
			.await
			.map_err(|e| TransportError::network("the service endpoint", e))?;

		if response.status() != StatusCode::UNAUTHORIZED {
			return Ok(response);
		}

		let Some(claims) = challenge::insufficient_claims(response.headers())? else {
			return Ok(response);
		};
		let Some(mut replay) = replay else {
			return Ok(response);
		};

		obs::event_debug!(url = %replay.url(), "Answering claims challenge.");

		let token = self.syncer.refresh(|| self.fetch(Some(claims))).await?;

		set_bearer(&mut replay, &token)?;

		retry::send_with_retry(client, replay, retry)
			.await
			.map_err(|e| TransportError::network("the service endpoint", e).into())
	}

	async fn fetch(&self, claims: Option<String>) -> Result<AccessToken> {
		let mut options = TokenRequestOptions::new(self.scopes.iter().cloned()).with_cae(true);

		if let Some(claims) = claims {
			options = options.with_claims(claims);
		}

		self.credential.get_token(&options).await
	}

	fn ensure_tls(&self, request: &Request) -> Result<(), ConfigError> {
		if request.url().scheme() == "https" || self.options.insecure_allow_http {
			Ok(())
		} else {
			Err(ConfigError::InsecureRequest { url: request.url().to_string() })
		}
	}
}
impl Debug for BearerTokenPolicy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BearerTokenPolicy")
			.field("credential", &self.credential.name())
			.field("scopes", &self.scopes)
			.field("options", &self.options)
			.finish()
	}
}

fn set_bearer(request: &mut Request, token: &AccessToken) -> Result<()> {
	let mut value =
		HeaderValue::from_str(&format!("Bearer {}", token.token.expose())).map_err(|_| {
			Error::authentication_failed("BearerTokenPolicy", "token is not a valid header value")
		})?;

	value.set_sensitive(true);
	request.headers_mut().insert(AUTHORIZATION, value);

	Ok(())
}
