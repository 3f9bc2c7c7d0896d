// Refresh token handling shared by the device code and authorization code credentials.

// self
use crate::{
	_prelude::*,
	auth::{
		AccessToken, ClientId, Freshness, ScopeSet, ScopeValidationError, TenantId, TokenFamily,
		TokenRecord, TokenRequestOptions, TokenSecret,
	},
	authority,
	cache::{CacheKey, TokenCache},
	credential::CredentialOptions,
	error::ConfigError,
	oauth::{EntraClient, TokenEndpointRequest},
	obs,
	store::{CompareAndSwapOutcome, MemoryStore, TokenStore},
};

pub(crate) struct PublicClient {
	name: &'static str,
	tenant: TenantId,
	allowed_tenants: Vec<String>,
	oauth: EntraClient,
	store: Arc<dyn TokenStore>,
	window: Duration,
	cache: TokenCache,
}
impl PublicClient {
	pub(crate) fn new(
		name: &'static str,
		tenant: TenantId,
		client_id: ClientId,
		store: Option<Arc<dyn TokenStore>>,
		options: &CredentialOptions,
	) -> Self {
		Self {
			name,
			tenant,
			allowed_tenants: options.additionally_allowed_tenants.clone(),
			oauth: EntraClient::new(
				name,
				options.authority_host.clone(),
				client_id,
				options.http(),
			),
			store: store.unwrap_or_else(|| Arc::new(MemoryStore::default())),
			window: options.refresh_window,
			cache: options.cache(),
		}
	}

	pub(crate) fn with_client_secret(mut self, secret: TokenSecret) -> Self {
		self.oauth = self.oauth.with_client_secret(secret);

		self
	}

	pub(crate) fn oauth(&self) -> &EntraClient {
		&self.oauth
	}

	pub(crate) fn tenant(&self) -> &TenantId {
		&self.tenant
	}

	/// Serves from the cache, then the store, and only then runs `interactive`.
	pub(crate) async fn get_token<F, Fut>(
		&self,
		options: &TokenRequestOptions,
		interactive: F,
	) -> Result<AccessToken>
	where
		F: FnOnce(TenantId, ScopeSet) -> Fut,
		Fut: Future<Output = Result<TokenRecord>>,
	{
		let scope = options.scope_set()?;

		if scope.is_empty() {
			return Err(ConfigError::InvalidScope(ScopeValidationError::Empty).into());
		}

		let tenant =
			authority::resolve_tenant(&self.tenant, options.tenant(), &self.allowed_tenants)?;
		let key = CacheKey::new(tenant.to_string(), scope.clone(), options.enable_cae);

		self.cache
			.get_or_fetch(&key, options.claims().is_some(), move || async move {
				if let Some(token) = self.silent(&tenant, &scope, options).await? {
					return Ok(token);
				}

				let record = interactive(tenant, scope).await?;

				self.store.save(record.clone()).await?;

				obs::event_debug!(credential = self.name, "Stored a new token record.");

				Ok(record.access())
			})
			.await
	}

	// Stored access token first, then any refresh token of the family. `None` means the user has
	// to sign in again.
	async fn silent(
		&self,
		tenant: &TenantId,
		scope: &ScopeSet,
		options: &TokenRequestOptions,
	) -> Result<Option<AccessToken>> {
		let family = TokenFamily::new(tenant.clone(), self.oauth.client_id().clone());
		let now = OffsetDateTime::now_utc();
		let exact = self.store.fetch(&family, scope).await?.filter(|record| !record.is_revoked());

		if options.claims().is_none()
			&& let Some(record) = &exact
			&& record.access().freshness_at(now, self.window) == Freshness::Fresh
		{
			return Ok(Some(record.access()));
		}

		let source = match exact.filter(|record| record.refresh_token.is_some()) {
			Some(record) => Some(record),
			None => self.store.fetch_latest(&family).await?,
		};
		let Some((source, refresh)) =
			source.and_then(|record| record.refresh_token.clone().map(|rt| (record, rt)))
		else {
			return Ok(None);
		};
		let request = TokenEndpointRequest::new(tenant, scope)
			.with_claims(options.claims())
			.with_cae(options.enable_cae);
		let record = match self.oauth.refresh_token(request, &refresh).await {
			Ok(record) => record,
			Err(Error::AuthenticationFailed(e))
				if e.error_code.as_deref() == Some("invalid_grant") =>
			{
				obs::event_warn!(
					credential = self.name,
					"Refresh token was rejected, revoking the stored record."
				);

				self.store.revoke(&family, &source.scope, now).await?;

				return Ok(None);
			},
			Err(e) => return Err(e),
		};

		self.rotate(&family, &source, &refresh, record).await.map(Some)
	}

	async fn rotate(
		&self,
		family: &TokenFamily,
		source: &TokenRecord,
		expected: &TokenSecret,
		record: TokenRecord,
	) -> Result<AccessToken> {
		let access = record.access();

		if source.scope != record.scope {
			self.store.save(record).await?;

			return Ok(access);
		}

		let outcome = self
			.store
			.compare_and_swap_refresh(
				family,
				&source.scope,
				Some(expected.expose()),
				record.clone(),
			)
			.await?;

		match outcome {
			CompareAndSwapOutcome::Updated => (),
			CompareAndSwapOutcome::Missing => self.store.save(record).await?,
			CompareAndSwapOutcome::RefreshMismatch => obs::event_debug!(
				credential = self.name,
				"Refresh token was rotated elsewhere, keeping the stored record."
			),
		}

		Ok(access)
	}
}
impl Debug for PublicClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PublicClient")
			.field("name", &self.name)
			.field("tenant", &self.tenant)
			.field("oauth", &self.oauth)
			.field("store", &self.store)
			.finish()
	}
}
