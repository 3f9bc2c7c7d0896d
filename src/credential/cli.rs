//! Running developer tools (`az`, `azd`, `pwsh`) for tokens.
//!
//! Tools are started with an argument vector, never through a shell string, and every scope
//! and tenant is validated before it reaches the command line.

// std
use std::{io, process::Stdio};
// self
use crate::{
	_prelude::*,
	auth::{
		AccessToken, ScopeSet, ScopeValidationError, TenantId, TokenRequestOptions,
		validate_tool_scope,
	},
	cache::{CacheKey, TokenCache},
	error::ConfigError,
	obs,
};

/// Default limit for one tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Boxed future returned by [`CommandExecutor::execute`].
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = io::Result<CommandOutput>> + 'a + Send>>;

/// Captured result of one tool invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
	/// Whether the process exited with status zero.
	pub success: bool,
	/// Standard output, lossily decoded.
	pub stdout: String,
	/// Standard error, lossily decoded.
	pub stderr: String,
}
impl CommandOutput {
	/// Successful output with `stdout`.
	pub fn ok(stdout: impl Into<String>) -> Self {
		Self { success: true, stdout: stdout.into(), stderr: String::new() }
	}

	/// Failed output with `stderr`.
	pub fn failed(stderr: impl Into<String>) -> Self {
		Self { success: false, stdout: String::new(), stderr: stderr.into() }
	}
}

/// Runs developer tools. Swap it out to test the CLI credentials without the tools installed.
pub trait CommandExecutor
where
	Self: Send + Sync,
{
	/// Runs `program` with `args`.
	///
	/// A missing program is reported as [`io::ErrorKind::NotFound`], an overrun as
	/// [`io::ErrorKind::TimedOut`].
	fn execute<'a>(&'a self, program: &'a str, args: &'a [String]) -> CommandFuture<'a>;
}
impl Debug for dyn CommandExecutor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("CommandExecutor(..)")
	}
}

/// [`CommandExecutor`] backed by `tokio::process`.
///
/// On Windows programs are started through `cmd /c` so `.cmd` shims such as `az.cmd` resolve.
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
	timeout: StdDuration,
}
impl ProcessExecutor {
	/// Sets the per-invocation timeout.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = timeout;

		self
	}
}
impl Default for ProcessExecutor {
	fn default() -> Self {
		Self { timeout: DEFAULT_TOOL_TIMEOUT }
	}
}
impl CommandExecutor for ProcessExecutor {
	fn execute<'a>(&'a self, program: &'a str, args: &'a [String]) -> CommandFuture<'a> {
		Box::pin(async move {
			let mut command = if cfg!(windows) {
				let mut command = tokio::process::Command::new("cmd");

				command.arg("/c").arg(program);

				command
			} else {
				tokio::process::Command::new(program)
			};

			command.args(args).stdin(Stdio::null()).kill_on_drop(true);

			let output = tokio::time::timeout(self.timeout, command.output()).await.map_err(|_| {
				io::Error::new(
					io::ErrorKind::TimedOut,
					format!("{program} didn't finish within {:?}", self.timeout),
				)
			})??;

			Ok(CommandOutput {
				success: output.status.success(),
				stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			})
		})
	}
}

/// One invocation prepared by a CLI credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Invocation {
	pub(crate) program: &'static str,
	pub(crate) args: Vec<String>,
}

/// What sets one developer tool apart from the others.
pub(crate) trait Tool
where
	Self: Send + Sync,
{
	const NAME: &'static str;
	const DISPLAY: &'static str;

	/// Output fragments meaning "installed but nobody is signed in".
	const LOGIN_HINTS: &'static [&'static str];

	fn invocation(&self, scope: &ScopeSet, tenant: Option<&TenantId>) -> Result<Invocation>;

	fn parse(&self, stdout: &str) -> Result<AccessToken, String>;
}

/// Tenant, cache, and error handling shared by the CLI credentials.
pub(crate) struct ToolRunner {
	tenant: Option<TenantId>,
	allowed_tenants: Vec<String>,
	executor: Arc<dyn CommandExecutor>,
	cache: TokenCache,
	in_default_chain: bool,
}
impl ToolRunner {
	pub(crate) fn new(
		tenant: Option<TenantId>,
		allowed_tenants: Vec<String>,
		executor: Arc<dyn CommandExecutor>,
		in_default_chain: bool,
	) -> Self {
		Self { tenant, allowed_tenants, executor, cache: TokenCache::new(), in_default_chain }
	}

	pub(crate) async fn get_token<T>(
		&self,
		tool: &T,
		options: &TokenRequestOptions,
	) -> Result<AccessToken>
	where
		T: Tool,
	{
		let scope = options.scope_set()?;

		if scope.is_empty() {
			return Err(ConfigError::InvalidScope(ScopeValidationError::Empty).into());
		}
		for s in scope.iter() {
			validate_tool_scope(s).map_err(ConfigError::from)?;
		}

		let tenant = self.tenant(options.tenant())?;
		let key = CacheKey::new(
			tenant.as_ref().map(ToString::to_string).unwrap_or_default(),
			scope.clone(),
			false,
		);
		let fetch = || self.run(tool, &scope, tenant.as_ref());
		let result = self.cache.get_or_fetch(&key, options.claims().is_some(), fetch).await;

		match result {
			Err(e) if self.in_default_chain && !matches!(e, Error::Config(_)) =>
				Err(e.into_unavailable(T::NAME)),
			result => result,
		}
	}

	async fn run<T>(
		&self,
		tool: &T,
		scope: &ScopeSet,
		tenant: Option<&TenantId>,
	) -> Result<AccessToken>
	where
		T: Tool,
	{
		let Invocation { program, args } = tool.invocation(scope, tenant)?;

		obs::event_debug!(credential = T::NAME, program, "Running developer tool.");

		let output = match self.executor.execute(program, &args).await {
			Ok(output) => output,
			Err(e) if e.kind() == io::ErrorKind::NotFound =>
				return Err(Error::unavailable(
					T::NAME,
					format!("{} not found on path", T::DISPLAY),
				)),
			Err(e) => return Err(Error::authentication_failed(T::NAME, e.to_string())),
		};
		let combined = format!("{}\n{}", output.stdout, output.stderr);

		if not_installed(&output) {
			return Err(Error::unavailable(T::NAME, format!("{} not found on path", T::DISPLAY)));
		}
		if T::LOGIN_HINTS.iter().any(|hint| combined.contains(hint)) {
			return Err(Error::unavailable(T::NAME, first_line(&output)));
		}
		if !output.success {
			return Err(Error::authentication_failed(T::NAME, first_line(&output)));
		}

		tool.parse(&output.stdout).map_err(|message| {
			Error::authentication_failed(T::NAME, format!("unexpected output: {message}"))
		})
	}

	fn tenant(&self, requested: Option<&str>) -> Result<Option<TenantId>, ConfigError> {
		match (&self.tenant, requested) {
			(Some(default), requested) => crate::authority::resolve_tenant(
				default,
				requested,
				&self.allowed_tenants,
			)
			.map(Some),
			(None, None) => Ok(None),
			(None, Some(requested)) => {
				let tenant = TenantId::new(requested)?;

				if self
					.allowed_tenants
					.iter()
					.any(|entry| entry == "*" || entry.eq_ignore_ascii_case(requested))
				{
					Ok(Some(tenant))
				} else {
					Err(ConfigError::TenantNotAllowed { tenant: requested.to_owned() })
				}
			},
		}
	}
}
impl Debug for ToolRunner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ToolRunner")
			.field("tenant", &self.tenant)
			.field("allowed_tenants", &self.allowed_tenants)
			.field("in_default_chain", &self.in_default_chain)
			.finish()
	}
}

// Shell-level "command not found" when the program ran through `cmd /c` or `sh`.
fn not_installed(output: &CommandOutput) -> bool {
	!output.success
		&& (output.stderr.contains("is not recognized as an internal or external command")
			|| output.stderr.contains("command not found"))
}

fn first_line(output: &CommandOutput) -> String {
	let text = if output.stderr.trim().is_empty() { &output.stdout } else { &output.stderr };

	text.lines()
		.map(str::trim)
		.find(|line| !line.is_empty())
		.map(|line| line.trim_start_matches("ERROR:").trim().to_owned())
		.unwrap_or_else(|| "the tool failed without output".into())
}
