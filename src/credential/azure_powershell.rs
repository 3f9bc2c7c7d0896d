//! Tokens from Azure PowerShell (`Get-AzAccessToken`).
//!
//! The script is passed with `-EncodedCommand` (UTF-16LE base64) so it survives `cmd /c` on
//! Windows unchanged.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
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

const NAME: &str = "AzurePowerShellCredential";
const NO_MODULE: &str = "NoAzAccountModule";

/// Options for [`AzurePowerShellCredential`].
#[derive(Clone, Debug)]
pub struct AzurePowerShellOptions {
	/// Tenant passed as `-TenantId`. Defaults to the PowerShell context's tenant.
	pub tenant_id: Option<TenantId>,
	/// Tenants, besides `tenant_id`, a request may name.
	pub additionally_allowed_tenants: Vec<String>,
	/// Runs `pwsh`.
	pub executor: Arc<dyn CommandExecutor>,
	pub(crate) in_default_chain: bool,
}
impl AzurePowerShellOptions {
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
impl Default for AzurePowerShellOptions {
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
struct AzurePowerShell;
impl AzurePowerShell {
	fn script(resource: &str, tenant: Option<&TenantId>) -> String {
		let tenant = tenant.map(ToString::to_string).unwrap_or_default();

		format!(
			r#"$ErrorActionPreference = 'Stop'
[version]$minimumVersion = '2.2.0'
$mod = Import-Module Az.Accounts -MinimumVersion $minimumVersion -PassThru -ErrorAction SilentlyContinue
if (-not $mod) {{
	Write-Output '{NO_MODULE}'
	exit
}}
$params = @{{ ResourceUrl = '{resource}'; WarningAction = 'Ignore' }}
if ('{tenant}'.Length -gt 0) {{
	$params['TenantId'] = '{tenant}'
}}
if ($mod.Version -ge [version]'2.17.0' -and $mod.Version -lt [version]'5.0.0') {{
	$params['AsSecureString'] = $true
}}
$token = Get-AzAccessToken @params
$value = $token.Token
if ($value -is [System.Security.SecureString]) {{
	$value = [System.Net.NetworkCredential]::new('', $value).Password
}}
[pscustomobject]@{{ Token = $value; ExpiresOn = $token.ExpiresOn.ToUnixTimeSeconds() }} | ConvertTo-Json
"#
		)
	}
}
impl Tool for AzurePowerShell {
	const DISPLAY: &'static str = "Azure PowerShell";
	const LOGIN_HINTS: &'static [&'static str] = &[NO_MODULE, "Connect-AzAccount"];
	const NAME: &'static str = NAME;

	fn invocation(&self, scope: &ScopeSet, tenant: Option<&TenantId>) -> Result<Invocation> {
		let resource = scope
			.single_resource()
			.ok_or(ConfigError::ScopeCount { credential: NAME, count: scope.len() })?;
		let script = Self::script(resource, tenant);
		let utf16 = script.encode_utf16().flat_map(u16::to_le_bytes).collect::<Vec<_>>();
		let mut args = Vec::from(
			["-NoProfile", "-NonInteractive", "-OutputFormat", "Text", "-EncodedCommand"]
				.map(str::to_owned),
		);

		args.push(STANDARD.encode(utf16));

		Ok(Invocation { program: "pwsh", args })
	}

	fn parse(&self, stdout: &str) -> Result<AccessToken, String> {
		#[derive(Deserialize)]
		#[serde(rename_all = "PascalCase")]
		struct PowerShellToken {
			token: String,
			expires_on: i64,
		}

		let de = &mut serde_json::Deserializer::from_str(stdout.trim());
		let token: PowerShellToken =
			serde_path_to_error::deserialize(de).map_err(|e| e.to_string())?;
		let expires_on =
			OffsetDateTime::from_unix_timestamp(token.expires_on).map_err(|e| e.to_string())?;

		Ok(AccessToken::new(token.token, expires_on))
	}
}

/// Acquires tokens for the account signed in to Azure PowerShell.
#[derive(Debug)]
pub struct AzurePowerShellCredential {
	runner: ToolRunner,
}
impl AzurePowerShellCredential {
	/// Creates a credential.
	pub fn new(options: AzurePowerShellOptions) -> Self {
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
impl TokenCredential for AzurePowerShellCredential {
	fn name(&self) -> &'static str {
		NAME
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(obs::observe(NAME, "get_token", self.runner.get_token(&AzurePowerShell, options)))
	}
}
