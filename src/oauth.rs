//! Entra token endpoint client built on the `oauth2` crate.
//!
//! [`EntraClient`] covers the grants the credentials need: client credentials (secret or
//! assertion), refresh token, authorization code with PKCE, and the device authorization
//! grant. Every response is turned into a [`TokenRecord`] and every failure into the crate
//! [`Error`] taxonomy: rejections by Entra become [`Error::AuthenticationFailed`], transport
//! problems [`Error::Transport`].

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, ClientId as OAuthClientId, ClientSecret,
	DeviceAuthorizationResponse, DeviceAuthorizationUrl, EndpointNotSet, EndpointSet,
	ErrorResponseType, ExtraDeviceAuthorizationFields, HttpClientError, PkceCodeVerifier,
	RedirectUrl, RefreshToken, RequestTokenError, Scope, StandardErrorResponse, TokenResponse,
	TokenUrl,
	basic::{BasicClient, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, ScopeSet, TenantId, TokenFamily, TokenRecord, TokenSecret},
	authority::AuthorityHost,
	error::{AuthenticationFailedError, ConfigError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
};

/// `client_assertion_type` for JWT bearer client assertions.
pub const JWT_BEARER_ASSERTION: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
/// Scopes public clients always request so Entra issues refresh and ID tokens.
pub const PUBLIC_CLIENT_SCOPES: [&str; 3] = ["offline_access", "openid", "profile"];

type EntraOAuthClient =
	BasicClient<EndpointSet, EndpointSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Boxed future returned by [`EntraClient`] operations.
pub type OAuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Callback shown the device code instructions.
pub type DeviceCodePrompt = dyn Fn(&DeviceCodeInfo) + Send + Sync;

/// What one token request asks Entra for.
#[derive(Clone, Copy, Debug)]
pub struct TokenEndpointRequest<'a> {
	/// Tenant to authenticate in.
	pub tenant: &'a TenantId,
	/// Requested scopes.
	pub scope: &'a ScopeSet,
	/// Claims demanded by a challenge.
	pub claims: Option<&'a str>,
	/// Declare the client CAE-capable.
	pub enable_cae: bool,
}
impl<'a> TokenEndpointRequest<'a> {
	/// Creates a request without claims or CAE.
	pub fn new(tenant: &'a TenantId, scope: &'a ScopeSet) -> Self {
		Self { tenant, scope, claims: None, enable_cae: false }
	}

	/// Sets challenge claims.
	pub fn with_claims(mut self, claims: Option<&'a str>) -> Self {
		self.claims = claims;

		self
	}

	/// Toggles CAE.
	pub fn with_cae(mut self, enable: bool) -> Self {
		self.enable_cae = enable;

		self
	}
}

/// Instructions for completing a device code sign-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCodeInfo {
	/// Code the user enters.
	pub user_code: String,
	/// Page where the code is entered.
	pub verification_uri: String,
	/// Ready-to-display instructions from Entra.
	pub message: String,
	/// When the device code stops working.
	pub expires_on: OffsetDateTime,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct EntraDeviceFields {
	#[serde(default)]
	message: Option<String>,
}
impl ExtraDeviceAuthorizationFields for EntraDeviceFields {}

/// Token endpoint client for one application registration.
pub struct EntraClient<C = ReqwestHttpClient>
where
	C: ?Sized + TokenHttpClient,
{
	credential: &'static str,
	authority: AuthorityHost,
	client_id: ClientId,
	client_secret: Option<TokenSecret>,
	http: Arc<C>,
}
impl<C> EntraClient<C>
where
	C: ?Sized + TokenHttpClient,
{
	/// Creates a public client reporting failures as `credential`.
	pub fn new(
		credential: &'static str,
		authority: AuthorityHost,
		client_id: ClientId,
		http: impl Into<Arc<C>>,
	) -> Self {
		Self { credential, authority, client_id, client_secret: None, http: http.into() }
	}

	/// Authenticates with a client secret in the request body.
	pub fn with_client_secret(mut self, secret: TokenSecret) -> Self {
		self.client_secret = Some(secret);

		self
	}

	/// Authority host requests are sent to.
	pub fn authority(&self) -> &AuthorityHost {
		&self.authority
	}

	/// Application (client) ID.
	pub fn client_id(&self) -> &ClientId {
		&self.client_id
	}

	/// Runs the client credentials grant, authenticating with the secret or `assertion`.
	pub fn client_credentials<'a>(
		&'a self,
		request: TokenEndpointRequest<'a>,
		assertion: Option<String>,
	) -> OAuthFuture<'a, TokenRecord> {
		Box::pin(async move {
			let slot = ResponseMetadataSlot::default();
			let handle = self.http.with_metadata(slot.clone());
			let client = self.oauth_client(request.tenant)?;
			let mut exchange = client.exchange_client_credentials();

			for scope in request.scope.iter() {
				exchange = exchange.add_scope(Scope::new(scope.to_owned()));
			}
			if let Some(assertion) = assertion {
				exchange = exchange
					.add_extra_param("client_assertion_type", JWT_BEARER_ASSERTION)
					.add_extra_param("client_assertion", assertion);
			}
			if let Some(claims) = merge_cae_claims(request.claims, request.enable_cae)? {
				exchange = exchange.add_extra_param("claims", claims);
			}

			let response = exchange
				.request_async(&handle)
				.await
				.map_err(|e| map_request_error(self.credential, slot.take(), e))?;

			self.into_record(request, response, None)
		})
	}

	/// Redeems `refresh_token` for a new access token.
	///
	/// The returned record keeps `refresh_token` when Entra does not rotate it.
	pub fn refresh_token<'a>(
		&'a self,
		request: TokenEndpointRequest<'a>,
		refresh_token: &'a TokenSecret,
	) -> OAuthFuture<'a, TokenRecord> {
		Box::pin(async move {
			let slot = ResponseMetadataSlot::default();
			let handle = self.http.with_metadata(slot.clone());
			let client = self.oauth_client(request.tenant)?;
			let secret = RefreshToken::new(refresh_token.expose().to_owned());
			let mut exchange = client.exchange_refresh_token(&secret);

			for scope in public_client_scopes(request.scope) {
				exchange = exchange.add_scope(Scope::new(scope));
			}
			if let Some(claims) = merge_cae_claims(request.claims, request.enable_cae)? {
				exchange = exchange.add_extra_param("claims", claims);
			}

			let response = exchange
				.request_async(&handle)
				.await
				.map_err(|e| map_request_error(self.credential, slot.take(), e))?;

			self.into_record(request, response, Some(refresh_token))
		})
	}

	/// Redeems an authorization code, with the PKCE verifier when one was used.
	pub fn authorization_code<'a>(
		&'a self,
		request: TokenEndpointRequest<'a>,
		code: &'a str,
		pkce_verifier: Option<&'a str>,
		redirect_uri: &'a Url,
	) -> OAuthFuture<'a, TokenRecord> {
		Box::pin(async move {
			let slot = ResponseMetadataSlot::default();
			let handle = self.http.with_metadata(slot.clone());
			let client = self.oauth_client(request.tenant)?;
			let mut exchange = client
				.exchange_code(AuthorizationCode::new(code.to_owned()))
				.set_redirect_uri(Cow::Owned(RedirectUrl::from_url(redirect_uri.clone())))
				.add_extra_param("scope", public_client_scopes(request.scope).join(" "));

			if let Some(verifier) = pkce_verifier {
				exchange = exchange.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_owned()));
			}
			if let Some(claims) = merge_cae_claims(request.claims, request.enable_cae)? {
				exchange = exchange.add_extra_param("claims", claims);
			}

			let response = exchange
				.request_async(&handle)
				.await
				.map_err(|e| map_request_error(self.credential, slot.take(), e))?;

			self.into_record(request, response, None)
		})
	}

	/// Runs the device authorization grant: requests a code, shows it through `prompt`, then
	/// polls until the user finishes, declines, or the code expires.
	pub fn device_code<'a>(
		&'a self,
		request: TokenEndpointRequest<'a>,
		prompt: &'a DeviceCodePrompt,
		timeout: Option<StdDuration>,
	) -> OAuthFuture<'a, TokenRecord> {
		Box::pin(async move {
			let slot = ResponseMetadataSlot::default();
			let handle = self.http.with_metadata(slot.clone());
			let client = self.oauth_client(request.tenant)?;
			let mut start = client.exchange_device_code();

			for scope in public_client_scopes(request.scope) {
				start = start.add_scope(Scope::new(scope));
			}
			if let Some(claims) = merge_cae_claims(request.claims, request.enable_cae)? {
				start = start.add_extra_param("claims", claims);
			}

			let details: DeviceAuthorizationResponse<EntraDeviceFields> = start
				.request_async(&handle)
				.await
				.map_err(|e| map_request_error(self.credential, slot.take(), e))?;
			let lifetime = i64::try_from(details.expires_in().as_secs()).unwrap_or(i64::MAX);
			let info = DeviceCodeInfo {
				user_code: details.user_code().secret().to_owned(),
				verification_uri: details.verification_uri().as_str().to_owned(),
				message: details.extra_fields().message.clone().unwrap_or_else(|| {
					format!(
						"To sign in, use a web browser to open the page {} and enter the code {} to authenticate.",
						details.verification_uri().as_str(),
						details.user_code().secret()
					)
				}),
				expires_on: OffsetDateTime::now_utc()
					.saturating_add(Duration::seconds(lifetime)),
			};

			prompt(&info);

			let response = client
				.exchange_device_access_token(&details)
				.request_async(&handle, tokio::time::sleep, timeout)
				.await
				.map_err(|e| map_request_error(self.credential, slot.take(), e))?;

			self.into_record(request, response, None)
		})
	}

	fn oauth_client(&self, tenant: &TenantId) -> Result<EntraOAuthClient> {
		let mut client = BasicClient::new(OAuthClientId::new(self.client_id.to_string()))
			.set_auth_uri(AuthUrl::from_url(self.authority.authorize_endpoint(tenant)?))
			.set_device_authorization_url(DeviceAuthorizationUrl::from_url(
				self.authority.device_code_endpoint(tenant)?,
			))
			.set_token_uri(TokenUrl::from_url(self.authority.token_endpoint(tenant)?))
			.set_auth_type(AuthType::RequestBody);

		if let Some(secret) = &self.client_secret {
			client = client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));
		}

		Ok(client)
	}

	fn into_record(
		&self,
		request: TokenEndpointRequest<'_>,
		response: BasicTokenResponse,
		previous_refresh: Option<&TokenSecret>,
	) -> Result<TokenRecord> {
		let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
		let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

		if expires_in <= 0 {
			return Err(ConfigError::NonPositiveExpiresIn.into());
		}

		let family = TokenFamily::new(request.tenant.clone(), self.client_id.clone());
		let issued_at = OffsetDateTime::now_utc();
		let access = AccessToken::new(
			response.access_token().secret().to_owned(),
			issued_at + Duration::seconds(expires_in),
		);
		let record =
			TokenRecord::new(family, request.scope.clone(), access).with_issued_at(issued_at);
		// Entra may omit the refresh token on rotation; the previous one stays valid then.
		let refresh = response
			.refresh_token()
			.map(|token| TokenSecret::new(token.secret().to_owned()))
			.or_else(|| previous_refresh.cloned());

		Ok(match refresh {
			Some(refresh) => record.with_refresh_token(refresh),
			None => record,
		})
	}
}
impl<C> Debug for EntraClient<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EntraClient")
			.field("credential", &self.credential)
			.field("authority", &self.authority)
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.finish()
	}
}

/// Adds the CAE client capability (`xms_cc: CP1`) to `claims` when `enable_cae` is set.
///
/// Existing claims must be a JSON object; the capability is merged into its `access_token`
/// member.
pub fn merge_cae_claims(
	claims: Option<&str>,
	enable_cae: bool,
) -> Result<Option<String>, ConfigError> {
	if !enable_cae {
		return Ok(claims.map(str::to_owned));
	}

	let mut root = match claims {
		Some(raw) => serde_json::from_str::<serde_json::Value>(raw)
			.ok()
			.and_then(|value| match value {
				serde_json::Value::Object(map) => Some(map),
				_ => None,
			})
			.ok_or_else(|| ConfigError::InvalidChallenge {
				reason: "claims are not a JSON object".into(),
			})?,
		None => serde_json::Map::new(),
	};
	let access_token = root
		.entry("access_token")
		.or_insert_with(|| serde_json::Value::Object(Default::default()));

	if !access_token.is_object() {
		*access_token = serde_json::Value::Object(Default::default());
	}
	if let Some(access_token) = access_token.as_object_mut() {
		access_token.insert("xms_cc".into(), serde_json::json!({ "values": ["CP1"] }));
	}

	Ok(Some(serde_json::Value::Object(root).to_string()))
}

pub(crate) fn public_client_scopes(scope: &ScopeSet) -> Vec<String> {
	let mut scopes = scope.iter().map(str::to_owned).collect::<Vec<_>>();

	for reserved in PUBLIC_CLIENT_SCOPES {
		if !scope.contains(reserved) {
			scopes.push(reserved.to_owned());
		}
	}

	scopes
}

fn map_request_error<RE, T>(
	credential: &'static str,
	meta: Option<ResponseMetadata>,
	err: RequestTokenError<HttpClientError<RE>, StandardErrorResponse<T>>,
) -> Error
where
	RE: 'static + Send + Sync + StdError,
	T: ErrorResponseType + Display,
{
	let status = meta.as_ref().and_then(|meta| meta.status);
	let request_id = meta.and_then(|meta| meta.request_id);
	let with_request_id = |message: String| match &request_id {
		Some(id) => format!("{message} (request id {id})"),
		None => message,
	};

	match err {
		RequestTokenError::ServerResponse(response) => {
			let code = response.error().to_string();
			let message = match response.error_description() {
				Some(description) => format!("{code}: {description}"),
				None => code.clone(),
			};

			AuthenticationFailedError::new(credential, with_request_id(message))
				.with_status(status)
				.with_error_code(code)
				.into()
		},
		RequestTokenError::Request(err) => map_transport_error(err),
		RequestTokenError::Parse(source, _body) => AuthenticationFailedError::new(
			credential,
			with_request_id("token endpoint returned an unexpected response".into()),
		)
		.with_status(status)
		.with_source(source)
		.into(),
		RequestTokenError::Other(message) =>
			AuthenticationFailedError::new(credential, with_request_id(message))
				.with_status(status)
				.into(),
	}
}

fn map_transport_error<RE>(err: HttpClientError<RE>) -> Error
where
	RE: 'static + Send + Sync + StdError,
{
	match err {
		HttpClientError::Reqwest(inner) =>
			TransportError::network("the token endpoint", *inner).into(),
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransportError::Other { message }.into(),
		_ => TransportError::Other { message: "unknown HTTP client failure".into() }.into(),
	}
}
