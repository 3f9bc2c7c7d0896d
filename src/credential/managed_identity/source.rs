//! Managed identity hosting environments and their token request shapes.

// std
use std::path::{Path, PathBuf};
// crates.io
use reqwest::{Method, Request};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::{self, Env},
	credential::UserAssignedId,
	error::{ConfigError, TransportError},
};

/// Default IMDS token endpoint.
pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
/// Largest Azure Arc key file accepted.
pub const ARC_MAX_KEY_SIZE: u64 = 4096;

const IMDS_TOKEN_PATH: &str = "/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_2017_API_VERSION: &str = "2017-09-01";
const APP_SERVICE_2019_API_VERSION: &str = "2019-08-01";
const SERVICE_FABRIC_API_VERSION: &str = "2019-07-01-preview";
const ARC_API_VERSION: &str = "2020-06-01";

/// Where managed identity tokens come from, detected from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManagedIdentitySource {
	/// App Service and Functions, 2017-09-01 protocol (`MSI_ENDPOINT` + `MSI_SECRET`).
	AppService2017 {
		/// Token endpoint.
		endpoint: Url,
		/// Value of the `secret` header.
		secret: TokenSecret,
	},
	/// Service Fabric (`IDENTITY_ENDPOINT` + `IDENTITY_HEADER` + `IDENTITY_SERVER_THUMBPRINT`).
	ServiceFabric {
		/// Token endpoint.
		endpoint: Url,
		/// Value of the `secret` header.
		secret: TokenSecret,
		/// Thumbprint of the endpoint's self-signed certificate.
		thumbprint: String,
	},
	/// App Service and Functions, 2019-08-01 protocol (`IDENTITY_ENDPOINT` + `IDENTITY_HEADER`).
	AppService2019 {
		/// Token endpoint.
		endpoint: Url,
		/// Value of the `X-IDENTITY-HEADER` header.
		header: TokenSecret,
	},
	/// Azure Arc enabled servers (`IDENTITY_ENDPOINT` + `IMDS_ENDPOINT`).
	AzureArc {
		/// Token endpoint.
		endpoint: Url,
	},
	/// Azure Cloud Shell (`MSI_ENDPOINT` only).
	CloudShell {
		/// Token endpoint.
		endpoint: Url,
	},
	/// Azure Instance Metadata Service.
	Imds {
		/// Token endpoint.
		endpoint: Url,
	},
}
impl ManagedIdentitySource {
	/// Detects the hosting environment from `env`. The first match wins.
	pub fn detect(env: &Env) -> Result<Self, ConfigError> {
		let identity_endpoint = env.get(config::IDENTITY_ENDPOINT);
		let identity_header = env.get(config::IDENTITY_HEADER);
		let msi_endpoint = env.get(config::MSI_ENDPOINT);

		if let (Some(endpoint), Some(secret)) = (msi_endpoint, env.get(config::MSI_SECRET)) {
			return Ok(Self::AppService2017 {
				endpoint: parse(config::MSI_ENDPOINT, endpoint)?,
				secret: TokenSecret::new(secret),
			});
		}
		if let (Some(endpoint), Some(header)) = (identity_endpoint, identity_header) {
			let endpoint = parse(config::IDENTITY_ENDPOINT, endpoint)?;
			let header = TokenSecret::new(header);

			return Ok(match env.get(config::IDENTITY_SERVER_THUMBPRINT) {
				Some(thumbprint) =>
					Self::ServiceFabric { endpoint, secret: header, thumbprint: thumbprint.into() },
				None => Self::AppService2019 { endpoint, header },
			});
		}
		if let (Some(endpoint), true) = (identity_endpoint, env.is_set(config::IMDS_ENDPOINT)) {
			return Ok(Self::AzureArc { endpoint: parse(config::IDENTITY_ENDPOINT, endpoint)? });
		}
		if let Some(endpoint) = msi_endpoint {
			return Ok(Self::CloudShell { endpoint: parse(config::MSI_ENDPOINT, endpoint)? });
		}

		let endpoint = match env.get(config::AZURE_POD_IDENTITY_AUTHORITY_HOST) {
			Some(host) => parse(
				config::AZURE_POD_IDENTITY_AUTHORITY_HOST,
				&format!("{}{IMDS_TOKEN_PATH}", host.trim_end_matches('/')),
			)?,
			None => parse("IMDS", IMDS_TOKEN_ENDPOINT)?,
		};

		Ok(Self::Imds { endpoint })
	}

	/// Human readable environment name.
	pub fn name(&self) -> &'static str {
		match self {
			Self::AppService2017 { .. } | Self::AppService2019 { .. } => "App Service",
			Self::ServiceFabric { .. } => "Service Fabric",
			Self::AzureArc { .. } => "Azure Arc",
			Self::CloudShell { .. } => "Cloud Shell",
			Self::Imds { .. } => "IMDS",
		}
	}

	/// Token endpoint of this environment.
	pub fn endpoint(&self) -> &Url {
		match self {
			Self::AppService2017 { endpoint, .. }
			| Self::ServiceFabric { endpoint, .. }
			| Self::AppService2019 { endpoint, .. }
			| Self::AzureArc { endpoint }
			| Self::CloudShell { endpoint }
			| Self::Imds { endpoint } => endpoint,
		}
	}

	/// Returns `true` for IMDS, the only source that is probed.
	pub fn is_imds(&self) -> bool {
		matches!(self, Self::Imds { .. })
	}

	/// Returns `false` for environments that only offer a system-assigned identity.
	pub fn supports_user_assigned(&self) -> bool {
		!matches!(
			self,
			Self::ServiceFabric { .. } | Self::AzureArc { .. } | Self::CloudShell { .. }
		)
	}

	/// Builds the token request for `resource`.
	pub fn token_request(
		&self,
		client: &ReqwestClient,
		resource: &str,
		id: Option<&UserAssignedId>,
	) -> Result<Request> {
		let endpoint = self.endpoint().clone();
		let builder = match self {
			Self::AppService2017 { secret, .. } => client
				.get(endpoint)
				.query(&[("api-version", APP_SERVICE_2017_API_VERSION), ("resource", resource)])
				.query(&id_param(id, "clientid", "principal_id", "mi_res_id"))
				.header("secret", secret.expose()),
			Self::ServiceFabric { secret, .. } => client
				.get(endpoint)
				.query(&[("api-version", SERVICE_FABRIC_API_VERSION), ("resource", resource)])
				.header("secret", secret.expose()),
			Self::AppService2019 { header, .. } => client
				.get(endpoint)
				.query(&[("api-version", APP_SERVICE_2019_API_VERSION), ("resource", resource)])
				.query(&id_param(id, "client_id", "principal_id", "mi_res_id"))
				.header("X-IDENTITY-HEADER", header.expose()),
			Self::AzureArc { .. } => client
				.get(endpoint)
				.query(&[("api-version", ARC_API_VERSION), ("resource", resource)])
				.header("Metadata", "true"),
			Self::CloudShell { .. } => client
				.request(Method::POST, endpoint)
				.form(&[("resource", resource)])
				.header("Metadata", "true"),
			Self::Imds { .. } => client
				.get(endpoint)
				.query(&[("api-version", IMDS_API_VERSION), ("resource", resource)])
				.query(&id_param(id, "client_id", "object_id", "msi_res_id"))
				.header("Metadata", "true"),
		};

		builder
			.build()
			.map_err(|e| TransportError::network("the managed identity endpoint", e).into())
	}

	/// IMDS request without the `Metadata` header, answered by any live IMDS.
	pub fn probe_request(&self, client: &ReqwestClient, timeout: StdDuration) -> Result<Request> {
		client
			.get(self.endpoint().clone())
			.timeout(timeout)
			.build()
			.map_err(|e| TransportError::network("the managed identity endpoint", e).into())
	}
}
impl Display for ManagedIdentitySource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.name())
	}
}

/// Platform directory the Azure Arc agent writes key files to.
pub fn default_arc_key_directory(env: &Env) -> Option<PathBuf> {
	if cfg!(target_os = "linux") {
		Some(PathBuf::from("/var/opt/azcmagent/tokens"))
	} else if cfg!(windows) {
		env.get("ProgramData")
			.map(|root| Path::new(root).join("AzureConnectedMachineAgent").join("Tokens"))
	} else {
		None
	}
}

/// Checks that an Arc challenge points at a `.key` file of at most [`ARC_MAX_KEY_SIZE`] bytes
/// inside `directory`, then reads it.
pub fn read_arc_key(path: &Path, directory: &Path) -> Result<String, String> {
	if path.extension().and_then(|ext| ext.to_str()) != Some("key") {
		return Err(format!("{} is not a .key file", path.display()));
	}
	if path.parent() != Some(directory) {
		return Err(format!("{} is not in {}", path.display(), directory.display()));
	}

	let metadata = std::fs::metadata(path)
		.map_err(|e| format!("failed to inspect {}: {e}", path.display()))?;

	if metadata.len() > ARC_MAX_KEY_SIZE {
		return Err(format!("{} is larger than {ARC_MAX_KEY_SIZE} bytes", path.display()));
	}

	std::fs::read_to_string(path)
		.map(|key| key.trim().to_owned())
		.map_err(|e| format!("failed to read {}: {e}", path.display()))
}

fn id_param(
	id: Option<&UserAssignedId>,
	client_id: &'static str,
	object_id: &'static str,
	resource_id: &'static str,
) -> Vec<(&'static str, String)> {
	match id {
		Some(UserAssignedId::ClientId(value)) => vec![(client_id, value.clone())],
		Some(UserAssignedId::ObjectId(value)) => vec![(object_id, value.clone())],
		Some(UserAssignedId::ResourceId(value)) => vec![(resource_id, value.clone())],
		None => Vec::new(),
	}
}

fn parse(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { what: name, source })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn query(request: &Request) -> HashMap<String, String> {
		request.url().query_pairs().into_owned().collect()
	}

	#[test]
	fn detection_order() {
		let cases = [
			(
				Env::from_pairs([
					(config::MSI_ENDPOINT, "http://localhost:1/msi"),
					(config::MSI_SECRET, "s"),
					(config::IDENTITY_ENDPOINT, "http://localhost:2/id"),
					(config::IDENTITY_HEADER, "h"),
				]),
				"App Service",
				"http://localhost:1/msi",
			),
			(
				Env::from_pairs([
					(config::IDENTITY_ENDPOINT, "https://localhost:2/id"),
					(config::IDENTITY_HEADER, "h"),
					(config::IDENTITY_SERVER_THUMBPRINT, "abc"),
				]),
				"Service Fabric",
				"https://localhost:2/id",
			),
			(
				Env::from_pairs([
					(
						config::IDENTITY_ENDPOINT,
						"http://localhost:40342/metadata/identity/oauth2/token",
					),
					(config::IMDS_ENDPOINT, "http://localhost:40342"),
				]),
				"Azure Arc",
				"http://localhost:40342/metadata/identity/oauth2/token",
			),
			(
				Env::from_pairs([(config::MSI_ENDPOINT, "http://localhost:50342/oauth2/token")]),
				"Cloud Shell",
				"http://localhost:50342/oauth2/token",
			),
			(Env::default(), "IMDS", IMDS_TOKEN_ENDPOINT),
			(
				Env::from_pairs([(config::AZURE_POD_IDENTITY_AUTHORITY_HOST, "http://10.0.0.1/")]),
				"IMDS",
				"http://10.0.0.1/metadata/identity/oauth2/token",
			),
		];

		for (env, name, endpoint) in cases {
			let source = ManagedIdentitySource::detect(&env).expect("Source should be detected.");

			assert_eq!(source.name(), name);
			assert_eq!(source.endpoint().as_str(), endpoint);
		}
	}

	#[test]
	fn imds_request_shape() {
		let source = ManagedIdentitySource::detect(&Env::default()).expect("IMDS is the default.");
		let client = ReqwestClient::new();
		let request = source
			.token_request(
				&client,
				"https://vault.azure.net",
				Some(&UserAssignedId::ClientId("client".into())),
			)
			.expect("Request should build.");
		let params = query(&request);

		assert_eq!(request.url().scheme(), "http");
		assert_eq!(params["api-version"], IMDS_API_VERSION);
		assert_eq!(params["resource"], "https://vault.azure.net");
		assert_eq!(params["client_id"], "client");
		assert_eq!(request.headers()["Metadata"], "true");

		let request = source
			.token_request(
				&client,
				"https://vault.azure.net",
				Some(&UserAssignedId::ResourceId("sample/resource/id".into())),
			)
			.expect("Request should build.");

		assert_eq!(query(&request)["msi_res_id"], "sample/resource/id");

		let probe = source
			.probe_request(&client, StdDuration::from_secs(1))
			.expect("Probe should build.");

		assert!(probe.headers().get("Metadata").is_none());
		assert_eq!(probe.timeout(), Some(&StdDuration::from_secs(1)));
	}

	#[test]
	fn app_service_request_shapes() {
		let client = ReqwestClient::new();
		let legacy = ManagedIdentitySource::detect(&Env::from_pairs([
			(config::MSI_ENDPOINT, "http://localhost/msi"),
			(config::MSI_SECRET, "secret"),
		]))
		.expect("App Service 2017 should be detected.");
		let request = legacy
			.token_request(&client, "r", Some(&UserAssignedId::ClientId("c".into())))
			.expect("Request should build.");

		assert_eq!(request.headers()["secret"], "secret");
		assert_eq!(query(&request)["api-version"], APP_SERVICE_2017_API_VERSION);
		assert_eq!(query(&request)["clientid"], "c");

		let current = ManagedIdentitySource::detect(&Env::from_pairs([
			(config::IDENTITY_ENDPOINT, "http://localhost/id"),
			(config::IDENTITY_HEADER, "header"),
		]))
		.expect("App Service 2019 should be detected.");
		let request = current
			.token_request(&client, "r", Some(&UserAssignedId::ResourceId("id".into())))
			.expect("Request should build.");

		assert_eq!(request.headers()["X-IDENTITY-HEADER"], "header");
		assert_eq!(query(&request)["api-version"], APP_SERVICE_2019_API_VERSION);
		assert_eq!(query(&request)["mi_res_id"], "id");
	}

	#[test]
	fn system_assigned_only_sources() {
		let cloud_shell =
			ManagedIdentitySource::detect(&Env::from_pairs([(config::MSI_ENDPOINT, "http://x/")]))
				.expect("Cloud Shell should be detected.");

		assert!(!cloud_shell.supports_user_assigned());
		assert!(ManagedIdentitySource::detect(&Env::default())
			.expect("IMDS is the default.")
			.supports_user_assigned());
	}

	#[test]
	fn invalid_endpoint_is_a_configuration_error() {
		let env = Env::from_pairs([(config::MSI_ENDPOINT, "https://t .com")]);
		let err = ManagedIdentitySource::detect(&env)
			.expect_err("Malformed endpoints must be rejected.");

		assert!(matches!(err, ConfigError::InvalidUrl { .. }));
	}

	#[test]
	fn arc_key_rules() {
		let directory = std::env::temp_dir().join(format!(
			"azure_identity_arc_{}_{}",
			std::process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos()
		));

		std::fs::create_dir_all(&directory).expect("Fixture directory should be created.");

		let key = directory.join("arc.key");
		let large = directory.join("large.key");
		let wrong_extension = directory.join("arc.txt");

		std::fs::write(&key, "expected-key\n").expect("Key should be written.");
		std::fs::write(&large, vec![b'a'; ARC_MAX_KEY_SIZE as usize + 1])
			.expect("Large key should be written.");
		std::fs::write(&wrong_extension, "x").expect("Fixture should be written.");

		assert_eq!(
			read_arc_key(&key, &directory).expect("Valid key should be read."),
			"expected-key"
		);
		assert!(read_arc_key(&large, &directory).is_err());
		assert!(read_arc_key(&wrong_extension, &directory).is_err());
		assert!(read_arc_key(&key, Path::new("/var/opt/azcmagent/tokens")).is_err());

		std::fs::remove_dir_all(&directory).expect("Fixture directory should be removable.");
	}
}
