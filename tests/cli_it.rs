// std
use std::{io, sync::Arc};
// crates.io
use parking_lot::Mutex;
// self
use azure_identity_broker::{
	auth::{TenantId, TokenRequestOptions},
	credential::{
		AzureCliCredential, AzureCliOptions, AzureDeveloperCliCredential,
		AzureDeveloperCliOptions, AzurePowerShellCredential, AzurePowerShellOptions,
		CommandExecutor, CommandFuture, CommandOutput, TokenCredential,
	},
	error::{ConfigError, Error},
};

const SCOPE: &str = "https://management.azure.com/.default";

/// Answers every invocation with the same scripted result and records the argument vectors.
struct ScriptedExecutor {
	answer: Box<dyn Fn() -> io::Result<CommandOutput> + Send + Sync>,
	calls: Mutex<Vec<(String, Vec<String>)>>,
}
impl ScriptedExecutor {
	fn new<F>(answer: F) -> Arc<Self>
	where
		F: 'static + Fn() -> io::Result<CommandOutput> + Send + Sync,
	{
		Arc::new(Self { answer: Box::new(answer), calls: Mutex::new(Vec::new()) })
	}

	fn calls(&self) -> Vec<(String, Vec<String>)> {
		self.calls.lock().clone()
	}
}
impl CommandExecutor for ScriptedExecutor {
	fn execute<'a>(&'a self, program: &'a str, args: &'a [String]) -> CommandFuture<'a> {
		Box::pin(async move {
			self.calls.lock().push((program.to_owned(), args.to_vec()));

			(self.answer)()
		})
	}
}

fn az(executor: Arc<ScriptedExecutor>) -> AzureCliCredential {
	AzureCliCredential::new(
		AzureCliOptions::default()
			.with_tenant_id(TenantId::new("contoso").expect("Tenant fixture should be valid."))
			.with_executor(executor),
	)
	.expect("Azure CLI credential should build.")
}

#[tokio::test]
async fn azure_cli_runs_once_and_caches_the_token() {
	let executor = ScriptedExecutor::new(|| {
		Ok(CommandOutput::ok(
			r#"{"accessToken":"cli-token","expiresOn":"2100-01-01 00:00:00.000000","expires_on":4102444800,"tenant":"contoso","tokenType":"Bearer"}"#,
		))
	});
	let credential = az(executor.clone());
	let options = TokenRequestOptions::new([SCOPE]);
	let first = credential.get_token(&options).await.expect("Azure CLI should return a token.");
	let second = credential.get_token(&options).await.expect("Cached token should be returned.");

	assert_eq!(first.token.expose(), "cli-token");
	assert_eq!(first.expires_on.unix_timestamp(), 4_102_444_800);
	assert_eq!(second.token.expose(), "cli-token");

	let calls = executor.calls();

	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].0, "az");
	assert_eq!(
		calls[0].1,
		[
			"account",
			"get-access-token",
			"--output",
			"json",
			"--resource",
			"https://management.azure.com",
			"--tenant",
			"contoso",
		]
	);
}

#[tokio::test]
async fn signed_out_and_missing_tools_are_unavailable() {
	let signed_out = ScriptedExecutor::new(|| {
		Ok(CommandOutput::failed("ERROR: Please run 'az login' to setup account."))
	});
	let err = az(signed_out)
		.get_token(&TokenRequestOptions::new([SCOPE]))
		.await
		.expect_err("A signed out CLI cannot return a token.");

	assert!(err.is_unavailable(), "Expected an unavailable error, got {err:?}.");

	let missing = ScriptedExecutor::new(|| Err(io::Error::from(io::ErrorKind::NotFound)));
	let err = az(missing)
		.get_token(&TokenRequestOptions::new([SCOPE]))
		.await
		.expect_err("A missing CLI cannot return a token.");

	assert!(err.is_unavailable());
	assert!(err.to_string().contains("Azure CLI not found on path"));
}

#[tokio::test]
async fn other_tool_failures_report_the_first_error_line() {
	let executor = ScriptedExecutor::new(|| {
		Ok(CommandOutput::failed(
			"ERROR: AADSTS50076: Due to a configuration change you must use multi-factor authentication.\nTrace: 1",
		))
	});
	let err = az(executor)
		.get_token(&TokenRequestOptions::new([SCOPE]))
		.await
		.expect_err("A failing CLI cannot return a token.");
	let Error::AuthenticationFailed(failure) = &err else {
		panic!("Expected an authentication failure, got {err:?}.");
	};

	assert!(failure.message.starts_with("AADSTS50076"));
	assert!(!failure.message.contains("Trace"));
}

#[tokio::test]
async fn unsafe_scopes_never_reach_the_tool() {
	let executor = ScriptedExecutor::new(|| Ok(CommandOutput::ok("{}")));
	let err = az(executor.clone())
		.get_token(&TokenRequestOptions::new(["https://vault.azure.net/.default;rm"]))
		.await
		.expect_err("Shell metacharacters must be rejected.");

	assert!(matches!(err, Error::Config(ConfigError::InvalidScope(_))));
	assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn azure_developer_cli_passes_scopes_through() {
	let executor = ScriptedExecutor::new(|| {
		Ok(CommandOutput::ok(r#"{"token":"azd-token","expiresOn":"2100-01-01T00:00:00Z"}"#))
	});
	let credential = AzureDeveloperCliCredential::new(
		AzureDeveloperCliOptions::default().with_executor(executor.clone()),
	);
	let token = credential
		.get_token(&TokenRequestOptions::new(["api://app/.default"]))
		.await
		.expect("azd should return a token.");

	assert_eq!(token.token.expose(), "azd-token");

	let calls = executor.calls();

	assert_eq!(calls[0].0, "azd");
	assert_eq!(
		calls[0].1,
		["auth", "token", "--output", "json", "--no-prompt", "--scope", "api://app/.default"]
	);

	let signed_out = ScriptedExecutor::new(|| {
		Ok(CommandOutput::failed("ERROR: not logged in, run `azd auth login` to login"))
	});
	let err = AzureDeveloperCliCredential::new(
		AzureDeveloperCliOptions::default().with_executor(signed_out),
	)
	.get_token(&TokenRequestOptions::new(["api://app/.default"]))
	.await
	.expect_err("A signed out azd cannot return a token.");

	assert!(err.is_unavailable());
}

#[tokio::test]
async fn azure_powershell_without_the_module_is_unavailable() {
	let executor = ScriptedExecutor::new(|| Ok(CommandOutput::ok("NoAzAccountModule\n")));
	let credential = AzurePowerShellCredential::new(
		AzurePowerShellOptions::default().with_executor(executor.clone()),
	);
	let err = credential
		.get_token(&TokenRequestOptions::new([SCOPE]))
		.await
		.expect_err("PowerShell without Az.Accounts cannot return a token.");

	assert!(err.is_unavailable(), "Expected an unavailable error, got {err:?}.");

	let calls = executor.calls();

	assert_eq!(calls[0].0, "pwsh");
	assert!(calls[0].1.contains(&"-EncodedCommand".to_owned()));

	let executor = ScriptedExecutor::new(|| {
		Ok(CommandOutput::ok("{\n  \"Token\": \"pwsh-token\",\n  \"ExpiresOn\": 4102444800\n}"))
	});
	let token = AzurePowerShellCredential::new(
		AzurePowerShellOptions::default().with_executor(executor),
	)
	.get_token(&TokenRequestOptions::new([SCOPE]))
	.await
	.expect("PowerShell should return a token.");

	assert_eq!(token.token.expose(), "pwsh-token");
}
