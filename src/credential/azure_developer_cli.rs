//! Tokens from the Azure Developer CLI (`azd auth token`).

// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ScopeSet, TenantId, TokenRequestOptions},
	credential::{
		CommandExecutor, ProcessExecutor, TokenCredential, TokenFuture,
		cli::{Invocation, Tool, ToolRunner},
	},
	obs,
};

const NAME: &str = "AzureDeveloperCLICredential";

/// Options for [`AzureDeveloperCliCredential`].
#[derive(Clone, Debug)]
pub struct AzureDeveloperCliOptions {
	/// Tenant passed as `--tenant-id`. Defaults to azd's active tenant.
	pub tenant_id: Option<TenantId>,
	/// Tenants, besides `tenant_id`, a request may name.
	pub additionally_allowed_tenants: Vec<String>,
	/// Runs `azd`.
	pub executor: Arc<dyn CommandExecutor>,
	pub(crate) in_default_chain: bool,
}
impl AzureDeveloperCliOptions {
	/// Sets the tenant.
	pub fn with_tenant_id(mut self, tenant_id: TenantId) -> Self {
		self.tenant_id = Some(tenant_id);

		self
	}

	/// Sets the additionally allowed tenants.
	pub fn with_additionally_allowed_tenants<I, S>(mut self, tenants: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.additionally_allowed_tenants = tenants.into_iter().map(Into::into).collect();

		self
	}

	/// Replaces the command executor.
	pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
		self.executor = executor;

		self
	}

	pub(crate) fn in_default_chain(mut self) -> Self {
		self.in_default_chain = true;

		self
	}
}
impl Default for AzureDeveloperCliOptions {
	fn default() -> Self {
		Self {
			tenant_id: None,
			additionally_allowed_tenants: Vec::new(),
			executor: Arc::new(ProcessExecutor::default()),
			in_default_chain: false,
		}
	}
}

#[derive(Debug)]
struct AzureDeveloperCli;
impl Tool for AzureDeveloperCli {
	const DISPLAY: &'static str = "Azure Developer CLI";
	const LOGIN_HINTS: &'static [&'static str] = &["azd auth login", "not logged in"];
	const NAME: &'static str = NAME;

	fn invocation(&self, scope: &ScopeSet, tenant: Option<&TenantId>) -> Result<Invocation> {
		let mut args =
			Vec::from(["auth", "token", "--output", "json", "--no-prompt"].map(str::to_owned));

		for s in scope.iter() {
			args.extend(["--scope".into(), s.to_owned()]);
		}
		if let Some(tenant) = tenant {
			args.extend(["--tenant-id".into(), tenant.to_string()]);
		}

		Ok(Invocation { program: "azd", args })
	}

	fn parse(&self, stdout: &str) -> Result<AccessToken, String> {
		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		struct AzdToken {
			token: String,
			expires_on: String,
		}

		let de = &mut serde_json::Deserializer::from_str(stdout);
		let token: AzdToken = serde_path_to_error::deserialize(de).map_err(|e| e.to_string())?;
		let expires_on = OffsetDateTime::parse(&token.expires_on, &Rfc3339)
			.map_err(|e| format!("invalid expiresOn {:?}: {e}", token.expires_on))?;

		Ok(AccessToken::new(token.token, expires_on))
	}
}

/// Acquires tokens for the account signed in to the Azure Developer CLI.
#[derive(Debug)]
pub struct AzureDeveloperCliCredential {
	runner: ToolRunner,
}
impl AzureDeveloperCliCredential {
	/// Creates a credential.
	pub fn new(options: AzureDeveloperCliOptions) -> Self {
		Self {
			runner: ToolRunner::new(
				options.tenant_id,
				options.additionally_allowed_tenants,
				options.executor,
				options.in_default_chain,
			),
		}
	}
}
impl TokenCredential for AzureDeveloperCliCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(
			NAME,
			"get_token",
			self.runner.get_token(&AzureDeveloperCli, options),
		))
	}
}
