//! Interactive sign-in on a second device via the OAuth 2.0 device authorization grant.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, TenantId, TokenRequestOptions},
	credential::{CredentialOptions, TokenCredential, TokenFuture, public::PublicClient},
	oauth::{DeviceCodeInfo, DeviceCodePrompt, TokenEndpointRequest},
	obs,
	store::TokenStore,
};

const NAME: &str = "DeviceCodeCredential";

/// Options for [`DeviceCodeCredential`].
#[derive(Clone)]
pub struct DeviceCodeOptions {
	/// Authority and transport settings.
	pub credential: CredentialOptions,
	/// Directory to sign in to. Defaults to `organizations`.
	pub tenant_id: TenantId,
	/// Public client application. Defaults to [`ClientId::developer_sign_on`].
	pub client_id: ClientId,
	/// Shows the code to the user. Defaults to printing Entra's message to stderr.
	pub prompt: Arc<DeviceCodePrompt>,
	/// Gives up polling after this long; otherwise the code's own expiry applies.
	pub timeout: Option<StdDuration>,
	/// Where refresh tokens are kept. Defaults to an in-process store.
	pub store: Option<Arc<dyn TokenStore>>,
}
impl DeviceCodeOptions {
	/// Sets the credential options.
	pub fn with_credential_options(mut self, options: CredentialOptions) -> Self {
		self.credential = options;

		self
	}

	/// Sets the tenant.
	pub fn with_tenant_id(mut self, tenant_id: TenantId) -> Self {
		self.tenant_id = tenant_id;

		self
	}

	/// Sets the client.
	pub fn with_client_id(mut self, client_id: ClientId) -> Self {
		self.client_id = client_id;

		self
	}

	/// Replaces the prompt.
	pub fn with_prompt<F>(mut self, prompt: F) -> Self
	where
		F: 'static + Fn(&DeviceCodeInfo) + Send + Sync,
	{
		self.prompt = Arc::new(prompt);

		self
	}

	/// Sets the polling timeout.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Sets the token store.
	pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
		self.store = Some(store);

		self
	}
}
impl Default for DeviceCodeOptions {
	fn default() -> Self {
		Self {
			credential: CredentialOptions::default(),
			tenant_id: TenantId::organizations(),
			client_id: ClientId::developer_sign_on(),
			prompt: Arc::new(|info: &DeviceCodeInfo| eprintln!("{}", info.message)),
			timeout: None,
			store: None,
		}
	}
}
impl Debug for DeviceCodeOptions {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DeviceCodeOptions")
			.field("credential", &self.credential)
			.field("tenant_id", &self.tenant_id)
			.field("client_id", &self.client_id)
			.field("timeout", &self.timeout)
			.field("store", &self.store)
			.finish()
	}
}

/// Signs the user in by having them enter a code on another device.
///
/// Tokens and refresh tokens land in the configured store. Later requests, including ones for
/// other scopes, are served silently until Entra rejects the refresh token.
pub struct DeviceCodeCredential {
	client: PublicClient,
	prompt: Arc<DeviceCodePrompt>,
	timeout: Option<StdDuration>,
}
impl DeviceCodeCredential {
	/// Creates a credential.
	pub fn new(options: DeviceCodeOptions) -> Self {
		Self {
			client: PublicClient::new(
				NAME,
				options.tenant_id,
				options.client_id,
				options.store,
				&options.credential,
			),
			prompt: options.prompt,
			timeout: options.timeout,
		}
	}

	async fn token(&self, options: &TokenRequestOptions) -> Result<AccessToken> {
		self.client
			.get_token(options, |tenant, scope| async move {
				let request = TokenEndpointRequest::new(&tenant, &scope)
					.with_claims(options.claims())
					.with_cae(options.enable_cae);

				self.client.oauth().device_code(request, self.prompt.as_ref(), self.timeout).await
			})
			.await
	}
}
impl Debug for DeviceCodeCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DeviceCodeCredential")
			.field("client", &self.client)
			.field("timeout", &self.timeout)
			.finish()
	}
}
impl TokenCredential for DeviceCodeCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(NAME, "get_token", self.token(options)))
	}
}
