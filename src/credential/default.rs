//! The default credential chain for code that runs both on developer machines and in Azure.

// self
use crate::{
	_prelude::*,
	auth::{TenantId, TokenRequestOptions},
	config::{self, Env},
	credential::{
		AzureCliCredential, AzureCliOptions, AzureDeveloperCliCredential,
		AzureDeveloperCliOptions, AzurePowerShellCredential, AzurePowerShellOptions,
		ChainedTokenCredential, CommandExecutor, CredentialOptions, EnvironmentCredential,
		ManagedIdentityCredential, ManagedIdentityOptions, TokenCredential, TokenFuture,
		UserAssignedId, WorkloadIdentityCredential, WorkloadIdentityOptions,
	},
	error::ConfigError,
	obs,
};

const NAME: &str = "DefaultAzureCredential";

const ENVIRONMENT: &str = "EnvironmentCredential";
const WORKLOAD_IDENTITY: &str = "WorkloadIdentityCredential";
const MANAGED_IDENTITY: &str = "ManagedIdentityCredential";
const AZURE_CLI: &str = "AzureCLICredential";
const AZURE_DEVELOPER_CLI: &str = "AzureDeveloperCLICredential";
const AZURE_POWERSHELL: &str = "AzurePowerShellCredential";

const DEPLOYED: [&str; 3] = [ENVIRONMENT, WORKLOAD_IDENTITY, MANAGED_IDENTITY];
const DEVELOPER: [&str; 3] = [AZURE_CLI, AZURE_DEVELOPER_CLI, AZURE_POWERSHELL];

/// Options for [`DefaultAzureCredential`].
#[derive(Clone, Debug, Default)]
pub struct DefaultAzureCredentialOptions {
	/// Shared credential options. Read from the environment when unset.
	pub credential: Option<CredentialOptions>,
	/// Tenant for the developer tool credentials and workload identity.
	pub tenant_id: Option<TenantId>,
	/// Client ID of a user-assigned managed identity. Defaults to `AZURE_CLIENT_ID`.
	pub managed_identity_client_id: Option<String>,
	/// Fail construction unless `AZURE_TOKEN_CREDENTIALS` is set.
	pub require_azure_token_credentials: bool,
	/// Runs the developer tools. Defaults to spawning processes.
	pub executor: Option<Arc<dyn CommandExecutor>>,
}
impl DefaultAzureCredentialOptions {
	/// Sets the shared credential options.
	pub fn with_credential_options(mut self, options: CredentialOptions) -> Self {
		self.credential = Some(options);

		self
	}

	/// Sets the tenant.
	pub fn with_tenant_id(mut self, tenant_id: TenantId) -> Self {
		self.tenant_id = Some(tenant_id);

		self
	}

	/// Selects a user-assigned managed identity by client ID.
	pub fn with_managed_identity_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.managed_identity_client_id = Some(client_id.into());

		self
	}

	/// Makes `AZURE_TOKEN_CREDENTIALS` mandatory.
	pub fn require_azure_token_credentials(mut self) -> Self {
		self.require_azure_token_credentials = true;

		self
	}

	/// Replaces the developer tool executor.
	pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
		self.executor = Some(executor);

		self
	}
}

/// Which sources `AZURE_TOKEN_CREDENTIALS` keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Selection {
	All,
	Deployed,
	Developer,
	Only(&'static str),
}
impl Selection {
	fn from_env(env: &Env, required: bool) -> Result<Self, ConfigError> {
		let Some(raw) = env.get(config::AZURE_TOKEN_CREDENTIALS) else {
			return if required {
				Err(ConfigError::MissingEnv { name: config::AZURE_TOKEN_CREDENTIALS })
			} else {
				Ok(Self::All)
			};
		};
		let value = raw.trim();

		if value.eq_ignore_ascii_case("prod") {
			return Ok(Self::Deployed);
		}
		if value.eq_ignore_ascii_case("dev") {
			return Ok(Self::Developer);
		}

		DEPLOYED
			.into_iter()
			.chain(DEVELOPER)
			.find(|name| name.eq_ignore_ascii_case(value))
			.map(Self::Only)
			.ok_or_else(|| ConfigError::InvalidEnv {
				name: config::AZURE_TOKEN_CREDENTIALS,
				value: raw.to_owned(),
				reason: format!(
					"expected \"dev\", \"prod\", or one of {}",
					DEPLOYED.into_iter().chain(DEVELOPER).collect::<Vec<_>>().join(", ")
				),
			})
	}

	fn includes(self, name: &str) -> bool {
		match self {
			Self::All => true,
			Self::Deployed => DEPLOYED.contains(&name),
			Self::Developer => DEVELOPER.contains(&name),
			Self::Only(only) => only == name,
		}
	}
}

struct Sources {
	selection: Selection,
	list: Vec<Arc<dyn TokenCredential>>,
}
impl Sources {
	fn add<F>(&mut self, name: &'static str, build: F)
	where
		F: FnOnce() -> Result<Arc<dyn TokenCredential>>,
	{
		if !self.selection.includes(name) {
			return;
		}

		let source: Arc<dyn TokenCredential> = match build() {
			Ok(source) => source,
			Err(e) => {
				let message = match e {
					Error::CredentialUnavailable(e) => e.message,
					e => e.to_string(),
				};

				obs::event_debug!(credential = name, reason = %message, "Source skipped.");

				Arc::new(UnavailableReporter { name, message })
			},
		};

		self.list.push(source);
	}
}

/// Reports why a source could not be constructed every time it is asked for a token.
#[derive(Debug)]
struct UnavailableReporter {
	name: &'static str,
	message: String,
}
impl TokenCredential for UnavailableReporter {
	fn name(&self) -> &'static str {
		self.name
	}

	fn get_token<'a>(&'a self, _: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(async move { Err(Error::unavailable(self.name, self.message.clone())) })
	}
}

/// Environment, workload identity, managed identity, Azure CLI, Azure Developer CLI, then
/// Azure PowerShell.
///
/// Set `AZURE_TOKEN_CREDENTIALS` to `prod` (the first three), `dev` (the developer tools), or a
/// single credential name to narrow the chain. Every request walks the chain from the start.
#[derive(Debug)]
pub struct DefaultAzureCredential {
	chain: ChainedTokenCredential,
}
impl DefaultAzureCredential {
	/// Builds the chain from the process environment.
	pub fn new(options: DefaultAzureCredentialOptions) -> Result<Self> {
		Self::from_env(&Env::process(), options)
	}

	/// Builds the chain from `env`.
	///
	/// Fails only for an invalid or (when required) missing `AZURE_TOKEN_CREDENTIALS` or
	/// invalid shared options. Sources that cannot be constructed are kept and report their
	/// reason when asked for a token.
	pub fn from_env(env: &Env, options: DefaultAzureCredentialOptions) -> Result<Self> {
		let selection = Selection::from_env(env, options.require_azure_token_credentials)?;
		let credential = match options.credential {
			Some(credential) => credential,
			None => CredentialOptions::from_env(env)?,
		};
		let mut sources = Sources { selection, list: Vec::new() };

		sources.add(ENVIRONMENT, || {
			Ok(Arc::new(EnvironmentCredential::from_env(env, credential.clone())?))
		});
		sources.add(WORKLOAD_IDENTITY, || {
			let workload = WorkloadIdentityOptions {
				credential: credential.clone(),
				tenant_id: options.tenant_id.clone(),
				..Default::default()
			};

			Ok(Arc::new(WorkloadIdentityCredential::from_env(env, workload)?))
		});
		sources.add(MANAGED_IDENTITY, || {
			let mut managed =
				ManagedIdentityOptions::default().with_credential_options(credential.clone());
			let client_id = options
				.managed_identity_client_id
				.clone()
				.or_else(|| env.get(config::AZURE_CLIENT_ID).map(str::to_owned));

			if let Some(client_id) = client_id {
				managed = managed.with_id(UserAssignedId::ClientId(client_id));
			}
			// Selected on its own, managed identity behaves as if constructed directly.
			if !matches!(selection, Selection::Only(_)) {
				managed = managed.in_default_chain();
			}

			Ok(Arc::new(ManagedIdentityCredential::from_env(env, managed)?))
		});
		sources.add(AZURE_CLI, || {
			let mut cli = AzureCliOptions::default()
				.with_additionally_allowed_tenants(credential.additionally_allowed_tenants.clone())
				.in_default_chain();

			cli.tenant_id = options.tenant_id.clone();

			if let Some(executor) = &options.executor {
				cli = cli.with_executor(executor.clone());
			}

			Ok(Arc::new(AzureCliCredential::new(cli)?))
		});
		sources.add(AZURE_DEVELOPER_CLI, || {
			let mut azd = AzureDeveloperCliOptions::default()
				.with_additionally_allowed_tenants(credential.additionally_allowed_tenants.clone())
				.in_default_chain();

			azd.tenant_id = options.tenant_id.clone();

			if let Some(executor) = &options.executor {
				azd = azd.with_executor(executor.clone());
			}

			Ok(Arc::new(AzureDeveloperCliCredential::new(azd)))
		});
		sources.add(AZURE_POWERSHELL, || {
			let mut pwsh = AzurePowerShellOptions::default()
				.with_additionally_allowed_tenants(credential.additionally_allowed_tenants.clone())
				.in_default_chain();

			pwsh.tenant_id = options.tenant_id.clone();

			if let Some(executor) = &options.executor {
				pwsh = pwsh.with_executor(executor.clone());
			}

			Ok(Arc::new(AzurePowerShellCredential::new(pwsh)))
		});

		Ok(Self {
			chain: ChainedTokenCredential::new(sources.list)
				.with_name(NAME)
				.with_retry_sources(true),
		})
	}

	/// Sources in the order they are tried.
	pub fn sources(&self) -> &[Arc<dyn TokenCredential>] {
		self.chain.sources()
	}
}
impl TokenCredential for DefaultAzureCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		self.chain.get_token(options)
	}
}
