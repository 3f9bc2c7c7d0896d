//! Service principal authentication with a certificate.
//!
//! The certificate's private key signs an RS256 client assertion. The JWT header carries the
//! SHA-256 thumbprint (`x5t#S256`) so Entra can find the registered certificate, plus the
//! certificate chain (`x5c`) when subject name/issuer authentication is enabled.

// std
use std::path::Path;
// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{ClientId, TenantId, TokenRequestOptions},
	credential::{
		AssertionFuture, ClientAssertion, CredentialOptions, TokenCredential, TokenFuture,
		confidential::{ClientAuth, ConfidentialClient},
	},
	error::ConfigError,
	obs,
};

const NAME: &str = "ClientCertificateCredential";
const ASSERTION_LIFETIME: Duration = Duration::minutes(10);

/// PEM certificate chain plus the RSA private key that signs client assertions.
#[derive(Clone)]
pub struct ClientCertificate {
	chain: Vec<Vec<u8>>,
	key: EncodingKey,
	thumbprint: String,
	send_chain: bool,
}
impl ClientCertificate {
	/// Parses a PEM bundle holding at least one certificate and an unencrypted private key.
	///
	/// The first certificate must be the one registered with the application.
	pub fn from_pem(pem: &[u8]) -> Result<Self, ConfigError> {
		let blocks = pem::parse_many(pem).map_err(|e| invalid(e.to_string()))?;
		let mut chain = Vec::new();
		let mut key = None;

		for block in &blocks {
			match block.tag() {
				"CERTIFICATE" => chain.push(block.contents().to_vec()),
				"PRIVATE KEY" | "RSA PRIVATE KEY" if key.is_none() =>
					key = Some(EncodingKey::from_rsa_pem(pem::encode(block).as_bytes())?),
				"ENCRYPTED PRIVATE KEY" =>
					return Err(invalid("encrypted private keys are not supported")),
				_ => {},
			}
		}

		let key = key.ok_or_else(|| invalid("no private key found"))?;
		let leaf = chain.first().ok_or_else(|| invalid("no certificate found"))?;
		let thumbprint = URL_SAFE_NO_PAD.encode(Sha256::digest(leaf));

		Ok(Self { chain, key, thumbprint, send_chain: false })
	}

	/// Reads and parses a PEM file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let pem = std::fs::read(path)
			.map_err(|e| invalid(format!("failed to read {}: {e}", path.display())))?;

		Self::from_pem(&pem)
	}

	/// Sends the `x5c` chain with each assertion (subject name/issuer authentication).
	pub fn with_send_chain(mut self, send_chain: bool) -> Self {
		self.send_chain = send_chain;

		self
	}

	/// Base64url SHA-256 thumbprint of the leaf certificate.
	pub fn thumbprint(&self) -> &str {
		&self.thumbprint
	}

	/// Signs an assertion for `client_id` targeting `audience`.
	pub fn sign(&self, client_id: &ClientId, audience: &Url) -> Result<String, ConfigError> {
		let mut header = Header::new(Algorithm::RS256);

		header.x5t_s256 = Some(self.thumbprint.clone());

		if self.send_chain {
			header.x5c = Some(self.chain.iter().map(|der| STANDARD.encode(der)).collect());
		}

		let now = OffsetDateTime::now_utc();
		let claims = AssertionClaims {
			aud: audience.as_str(),
			iss: client_id,
			sub: client_id,
			jti: uuid::Uuid::new_v4().to_string(),
			nbf: now.unix_timestamp(),
			iat: now.unix_timestamp(),
			exp: (now + ASSERTION_LIFETIME).unix_timestamp(),
		};

		Ok(jsonwebtoken::encode(&header, &claims, &self.key)?)
	}
}
impl Debug for ClientCertificate {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientCertificate")
			.field("thumbprint", &self.thumbprint)
			.field("chain_len", &self.chain.len())
			.field("send_chain", &self.send_chain)
			.finish()
	}
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
	aud: &'a str,
	iss: &'a str,
	sub: &'a str,
	jti: String,
	nbf: i64,
	iat: i64,
	exp: i64,
}

struct CertificateAssertion {
	client_id: ClientId,
	certificate: ClientCertificate,
}
impl ClientAssertion for CertificateAssertion {
	fn assertion<'a>(&'a self, audience: &'a Url) -> AssertionFuture<'a> {
		Box::pin(async move { Ok(self.certificate.sign(&self.client_id, audience)?) })
	}
}

/// Client credentials grant authenticated by a certificate-signed assertion.
#[derive(Debug)]
pub struct ClientCertificateCredential {
	client: ConfidentialClient,
}
impl ClientCertificateCredential {
	/// Creates a credential for the application `client_id` in `tenant_id`.
	pub fn new(
		tenant_id: TenantId,
		client_id: ClientId,
		certificate: ClientCertificate,
		options: CredentialOptions,
	) -> Self {
		let assertion =
			Arc::new(CertificateAssertion { client_id: client_id.clone(), certificate });

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
impl TokenCredential for ClientCertificateCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(NAME, "get_token", self.client.get_token(options)))
	}
}

fn invalid(reason: impl Into<String>) -> ConfigError {
	ConfigError::InvalidCertificate { reason: reason.into() }
}
