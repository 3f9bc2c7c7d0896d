//! Authorization code redemption plus the PKCE handshake that precedes it.
//!
//! [`AuthorizationSession::start`] builds the `/authorize` URL the user is sent to. Once the
//! redirect comes back, [`AuthorizationSession::validate_state`] checks the state and
//! [`AuthorizationSession::into_credential`] turns the code into an
//! [`AuthorizationCodeCredential`] that redeems it together with the PKCE verifier.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, ScopeSet, TenantId, TokenRequestOptions, TokenSecret},
	authority::AuthorityHost,
	credential::{CredentialOptions, TokenCredential, TokenFuture, public::PublicClient},
	oauth::{self, TokenEndpointRequest},
	obs,
	store::TokenStore,
};

const NAME: &str = "AuthorizationCodeCredential";
const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Authorization code + PKCE handshake state for one sign-in.
#[derive(Clone)]
pub struct AuthorizationSession {
	/// Tenant the user signs in to.
	pub tenant: TenantId,
	/// Application the code is issued to.
	pub client_id: ClientId,
	/// Requested scopes.
	pub scope: ScopeSet,
	/// Opaque value that must come back unchanged on the redirect.
	pub state: String,
	/// Redirect URI registered for the application.
	pub redirect_uri: Url,
	/// `/authorize` URL to send the user to.
	pub authorize_url: Url,
	verifier: String,
	challenge: String,
}
impl AuthorizationSession {
	/// Starts a sign-in with a fresh state and an S256 PKCE pair.
	pub fn start(
		authority: &AuthorityHost,
		tenant: TenantId,
		client_id: ClientId,
		scope: ScopeSet,
		redirect_uri: Url,
	) -> Result<Self> {
		let state = random_string(STATE_LEN);
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = pkce_challenge(&verifier);
		let mut authorize_url = authority.authorize_endpoint(&tenant)?;

		authorize_url
			.query_pairs_mut()
			.append_pair("response_type", "code")
			.append_pair("client_id", &client_id)
			.append_pair("redirect_uri", redirect_uri.as_str())
			.append_pair("scope", &oauth::public_client_scopes(&scope).join(" "))
			.append_pair("state", &state)
			.append_pair("code_challenge", &challenge)
			.append_pair("code_challenge_method", "S256");

		Ok(Self {
			tenant,
			client_id,
			scope,
			state,
			redirect_uri,
			authorize_url,
			verifier,
			challenge,
		})
	}

	/// PKCE code challenge sent in the authorize URL.
	pub fn code_challenge(&self) -> &str {
		&self.challenge
	}

	/// Checks the `state` returned on the redirect.
	pub fn validate_state(&self, returned_state: &str) -> Result<()> {
		if returned_state == self.state {
			Ok(())
		} else {
			Err(Error::authentication_failed(NAME, "authorization state mismatch"))
		}
	}

	/// Builds a credential that redeems `code` with this session's verifier.
	pub fn into_credential(
		self,
		code: impl Into<String>,
		options: AuthorizationCodeOptions,
	) -> AuthorizationCodeCredential {
		let mut credential = AuthorizationCodeCredential::new(
			self.tenant,
			self.client_id,
			code,
			self.redirect_uri,
			options,
		);

		credential.pkce_verifier = Some(self.verifier);

		credential
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("tenant", &self.tenant)
			.field("client_id", &self.client_id)
			.field("scope", &self.scope)
			.field("state", &self.state)
			.field("redirect_uri", &self.redirect_uri)
			.field("authorize_url", &self.authorize_url)
			.field("code_challenge", &self.challenge)
			.finish()
	}
}

/// Options for [`AuthorizationCodeCredential`].
#[derive(Clone, Debug, Default)]
pub struct AuthorizationCodeOptions {
	/// Authority and transport settings.
	pub credential: CredentialOptions,
	/// Secret of a confidential web application, if the code was issued to one.
	pub client_secret: Option<TokenSecret>,
	/// Where refresh tokens are kept. Defaults to an in-process store.
	pub store: Option<Arc<dyn TokenStore>>,
}
impl AuthorizationCodeOptions {
	/// Sets the credential options.
	pub fn with_credential_options(mut self, options: CredentialOptions) -> Self {
		self.credential = options;

		self
	}

	/// Authenticates the redemption with a client secret.
	pub fn with_client_secret(mut self, secret: impl Into<TokenSecret>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Sets the token store.
	pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
		self.store = Some(store);

		self
	}
}

/// Redeems an authorization code once, then serves tokens from its refresh token.
pub struct AuthorizationCodeCredential {
	client: PublicClient,
	code: Mutex<Option<String>>,
	redirect_uri: Url,
	pkce_verifier: Option<String>,
}
impl AuthorizationCodeCredential {
	/// Creates a credential for a code obtained without PKCE.
	pub fn new(
		tenant_id: TenantId,
		client_id: ClientId,
		code: impl Into<String>,
		redirect_uri: Url,
		options: AuthorizationCodeOptions,
	) -> Self {
		let mut client =
			PublicClient::new(NAME, tenant_id, client_id, options.store, &options.credential);

		if let Some(secret) = options.client_secret {
			client = client.with_client_secret(secret);
		}

		Self { client, code: Mutex::new(Some(code.into())), redirect_uri, pkce_verifier: None }
	}

	/// Tenant tokens are requested from by default.
	pub fn tenant_id(&self) -> &TenantId {
		self.client.tenant()
	}

	async fn token(&self, options: &TokenRequestOptions) -> Result<AccessToken> {
		self.client
			.get_token(options, |tenant, scope| async move {
				let Some(code) = self.code.lock().take() else {
					return Err(Error::authentication_failed(
						NAME,
						"the authorization code was already redeemed and no refresh token is stored",
					));
				};
				let request = TokenEndpointRequest::new(&tenant, &scope)
					.with_claims(options.claims())
					.with_cae(options.enable_cae);

				self.client
					.oauth()
					.authorization_code(
						request,
						&code,
						self.pkce_verifier.as_deref(),
						&self.redirect_uri,
					)
					.await
			})
			.await
	}
}
impl Debug for AuthorizationCodeCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationCodeCredential")
			.field("client", &self.client)
			.field("redirect_uri", &self.redirect_uri)
			.field("code_pending", &self.code.lock().is_some())
			.field("pkce", &self.pkce_verifier.is_some())
			.finish()
	}
}
impl TokenCredential for AuthorizationCodeCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(NAME, "get_token", self.token(options)))
	}
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn pkce_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn session() -> AuthorizationSession {
		AuthorizationSession::start(
			&AuthorityHost::public_cloud(),
			TenantId::new("contoso").expect("Tenant fixture should be valid."),
			ClientId::new("client").expect("Client fixture should be valid."),
			ScopeSet::new(["https://graph.microsoft.com/User.Read"])
				.expect("Scope fixture should be valid."),
			Url::parse("http://localhost:8400/callback").expect("Redirect fixture should parse."),
		)
		.expect("Session should start.")
	}

	#[test]
	fn authorize_url_carries_pkce_and_state() {
		let session = session();
		let pairs = session.authorize_url.query_pairs().into_owned().collect::<HashMap<_, _>>();

		assert!(
			session
				.authorize_url
				.as_str()
				.starts_with("https://login.microsoftonline.com/contoso/oauth2/v2.0/authorize?")
		);
		assert_eq!(pairs["response_type"], "code");
		assert_eq!(pairs["client_id"], "client");
		assert_eq!(pairs["state"], session.state);
		assert_eq!(pairs["code_challenge"], session.code_challenge());
		assert_eq!(pairs["code_challenge_method"], "S256");
		assert!(pairs["scope"].contains("offline_access"));
		assert_eq!(session.state.len(), STATE_LEN);
		assert_eq!(session.verifier.len(), PKCE_VERIFIER_LEN);
	}

	#[test]
	fn challenge_matches_rfc_7636_example() {
		assert_eq!(
			pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
			"E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
		);
	}

	#[test]
	fn state_mismatch_is_rejected() {
		let session = session();

		assert!(session.validate_state(&session.state.clone()).is_ok());
		assert!(matches!(session.validate_state("other"), Err(Error::AuthenticationFailed(_))));
	}

	#[test]
	fn debug_hides_the_code_and_verifier() {
		let session = session();
		let verifier = session.verifier.clone();
		let credential = session.into_credential("secret-code", Default::default());
		let rendered = format!("{credential:?}");

		assert!(!rendered.contains("secret-code"));
		assert!(!rendered.contains(&verifier));
		assert_eq!(credential.tenant_id().as_str(), "contoso");
	}
}
