// Shared client credentials grant behind the secret, certificate, and assertion credentials.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, ScopeValidationError, TenantId, TokenRequestOptions, TokenSecret},
	authority,
	cache::{CacheKey, TokenCache},
	credential::{ClientAssertion, CredentialOptions},
	error::ConfigError,
	oauth::{EntraClient, TokenEndpointRequest},
};

pub(crate) enum ClientAuth {
	Secret(TokenSecret),
	Assertion(Arc<dyn ClientAssertion>),
}

pub(crate) struct ConfidentialClient {
	name: &'static str,
	tenant: TenantId,
	allowed_tenants: Vec<String>,
	oauth: EntraClient,
	assertion: Option<Arc<dyn ClientAssertion>>,
	cache: TokenCache,
}
impl ConfidentialClient {
	pub(crate) fn new(
		name: &'static str,
		tenant: TenantId,
		client_id: ClientId,
		auth: ClientAuth,
		options: &CredentialOptions,
	) -> Self {
		let oauth =
			EntraClient::new(name, options.authority_host.clone(), client_id, options.http());
		let (oauth, assertion) = match auth {
			ClientAuth::Secret(secret) => (oauth.with_client_secret(secret), None),
			ClientAuth::Assertion(assertion) => (oauth, Some(assertion)),
		};

		Self {
			name,
			tenant,
			allowed_tenants: options.additionally_allowed_tenants.clone(),
			oauth,
			assertion,
			cache: options.cache(),
		}
	}

	pub(crate) fn tenant(&self) -> &TenantId {
		&self.tenant
	}

	pub(crate) async fn get_token(&self, options: &TokenRequestOptions) -> Result<AccessToken> {
		let scope = options.scope_set()?;

		if scope.is_empty() {
			return Err(ConfigError::InvalidScope(ScopeValidationError::Empty).into());
		}

		let tenant =
			authority::resolve_tenant(&self.tenant, options.tenant(), &self.allowed_tenants)?;
		let key = CacheKey::new(tenant.to_string(), scope.clone(), options.enable_cae);
		let claims = options.claims();
		let (tenant, scope) = (&tenant, &scope);

		self.cache
			.get_or_fetch(&key, claims.is_some(), move || async move {
				let assertion = match &self.assertion {
					Some(assertion) => {
						let audience = self.oauth.authority().token_endpoint(tenant)?;

						Some(assertion.assertion(&audience).await?)
					},
					None => None,
				};
				let request = TokenEndpointRequest::new(tenant, scope)
					.with_claims(claims)
					.with_cae(options.enable_cae);
				let record = self.oauth.client_credentials(request, assertion).await?;

				Ok(record.access())
			})
			.await
	}
}
impl Debug for ConfidentialClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConfidentialClient")
			.field("name", &self.name)
			.field("tenant", &self.tenant)
			.field("oauth", &self.oauth)
			.field("assertion", &self.assertion.is_some())
			.finish()
	}
}
