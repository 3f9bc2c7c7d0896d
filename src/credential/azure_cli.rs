//! Tokens from the Azure CLI (`az account get-access-token`).

// crates.io
use time::{
	PrimitiveDateTime, UtcOffset, format_description::BorrowedFormatItem,
	macros::format_description,
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ScopeSet, TenantId, TokenRequestOptions},
	credential::{
		CommandExecutor, ProcessExecutor, TokenCredential, TokenFuture,
		cli::{Invocation, Tool, ToolRunner},
	},
	error::ConfigError,
	obs,
};

const NAME: &str = "AzureCLICredential";
const LOCAL_EXPIRY: &[BorrowedFormatItem<'static>] = format_description!(
	"[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
);

/// Options for [`AzureCliCredential`].
#[derive(Clone, Debug)]
pub struct AzureCliOptions {
	/// Tenant passed as `--tenant`. Defaults to the CLI's active tenant.
	pub tenant_id: Option<TenantId>,
	/// Subscription name or ID passed as `--subscription`.
	pub subscription: Option<String>,
	/// Tenants, besides `tenant_id`, a request may name.
	pub additionally_allowed_tenants: Vec<String>,
	/// Runs `az`.
	pub executor: Arc<dyn CommandExecutor>,
	pub(crate) in_default_chain: bool,
}
impl AzureCliOptions {
	/// Sets the tenant.
	pub fn with_tenant_id(mut self, tenant_id: TenantId) -> Self {
		self.tenant_id = Some(tenant_id);

		self
	}

	/// Sets the subscription.
	pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
		self.subscription = Some(subscription.into());

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
impl Default for AzureCliOptions {
	fn default() -> Self {
		Self {
			tenant_id: None,
			subscription: None,
			additionally_allowed_tenants: Vec::new(),
			executor: Arc::new(ProcessExecutor::default()),
			in_default_chain: false,
		}
	}
}

#[derive(Debug)]
struct AzureCli {
	subscription: Option<String>,
}
impl Tool for AzureCli {
	const DISPLAY: &'static str = "Azure CLI";
	const LOGIN_HINTS: &'static [&'static str] = &["az login", "az account set"];
	const NAME: &'static str = NAME;

	fn invocation(&self, scope: &ScopeSet, tenant: Option<&TenantId>) -> Result<Invocation> {
		let resource = scope
			.single_resource()
			.ok_or(ConfigError::ScopeCount { credential: NAME, count: scope.len() })?;
		let mut args = Vec::from(
			["account", "get-access-token", "--output", "json", "--resource", resource]
				.map(str::to_owned),
		);

		if let Some(tenant) = tenant {
			args.extend(["--tenant".into(), tenant.to_string()]);
		}
		if let Some(subscription) = &self.subscription {
			args.extend(["--subscription".into(), subscription.clone()]);
		}

		Ok(Invocation { program: "az", args })
	}

	fn parse(&self, stdout: &str) -> Result<AccessToken, String> {
		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		struct CliToken {
			access_token: String,
			#[serde(default)]
			expires_on: Option<String>,
			#[serde(default, rename = "expires_on")]
			expires_on_unix: Option<i64>,
		}

		let de = &mut serde_json::Deserializer::from_str(stdout);
		let token: CliToken = serde_path_to_error::deserialize(de).map_err(|e| e.to_string())?;
		let expires_on = match (token.expires_on_unix, token.expires_on.as_deref()) {
			(Some(unix), _) =>
				OffsetDateTime::from_unix_timestamp(unix).map_err(|e| e.to_string())?,
			(None, Some(local)) => parse_local(local)?,
			(None, None) => return Err("no expiry in output".into()),
		};

		Ok(AccessToken::new(token.access_token, expires_on))
	}
}

/// Acquires tokens for the account signed in to the Azure CLI.
#[derive(Debug)]
pub struct AzureCliCredential {
	tool: AzureCli,
	runner: ToolRunner,
}
impl AzureCliCredential {
	/// Creates a credential. Fails when the subscription contains characters `az` could
	/// misinterpret.
	pub fn new(options: AzureCliOptions) -> Result<Self> {
		if let Some(subscription) = &options.subscription
			&& !subscription
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
		{
			return Err(ConfigError::Unsupported {
				credential: NAME,
				feature: format!(
					"subscription {subscription:?}; use only alphanumerics, spaces, '-', '_' and '.'"
				),
			}
			.into());
		}

		Ok(Self {
			tool: AzureCli { subscription: options.subscription },
			runner: ToolRunner::new(
				options.tenant_id,
				options.additionally_allowed_tenants,
				options.executor,
				options.in_default_chain,
			),
		})
	}
}
impl TokenCredential for AzureCliCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(NAME, "get_token", self.runner.get_token(&self.tool, options)))
	}
}

// Older CLIs only print `expiresOn` in the machine's local time zone.
fn parse_local(raw: &str) -> Result<OffsetDateTime, String> {
	let local = PrimitiveDateTime::parse(raw, LOCAL_EXPIRY)
		.map_err(|e| format!("invalid expiresOn {raw:?}: {e}"))?;
	let offset = UtcOffset::local_offset_at(local.assume_utc()).unwrap_or(UtcOffset::UTC);

	Ok(local.assume_offset(offset))
}
