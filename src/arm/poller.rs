//! Long-running ARM operations.
//!
//! The poller follows `Azure-AsyncOperation` when the service sends it, otherwise `Location`,
//! otherwise the resource's own `properties.provisioningState`.

// crates.io
use reqwest::{Method, Response, StatusCode, header::LOCATION};
use serde::de::DeserializeOwned;
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	arm::{self, ArmClient},
	error::{ConfigError, ResponseError},
	obs,
	policy::retry,
};

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";
/// Wait between polls when the service sends no `Retry-After`.
pub const DEFAULT_POLL_FREQUENCY: StdDuration = StdDuration::from_secs(30);

/// State of a long-running operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStatus {
	/// Still running.
	InProgress,
	/// Finished successfully.
	Succeeded,
	/// Finished with an error.
	Failed,
	/// Canceled before finishing.
	Canceled,
}
impl PollStatus {
	/// Maps an ARM status string; anything unknown means the operation is still running.
	pub fn parse(raw: &str) -> Self {
		match raw.trim().to_ascii_lowercase().as_str() {
			"succeeded" => Self::Succeeded,
			"failed" => Self::Failed,
			"canceled" | "cancelled" => Self::Canceled,
			_ => Self::InProgress,
		}
	}

	/// Returns `true` once the operation can no longer change.
	pub fn is_terminal(self) -> bool {
		!matches!(self, Self::InProgress)
	}
}

#[derive(Clone, Debug)]
enum Monitor {
	AsyncOperation(Url),
	Location(Url),
	Resource,
}

/// Tracks one long-running operation until it reaches a terminal state.
#[derive(Debug)]
pub struct Poller {
	client: ArmClient,
	method: Method,
	resource: Url,
	monitor: Monitor,
	status: PollStatus,
	result: Option<Value>,
	error: Option<(Option<String>, String)>,
	retry_after: Option<StdDuration>,
	frequency: StdDuration,
}
impl Poller {
	pub(crate) async fn from_response(
		client: ArmClient,
		method: Method,
		resource: Url,
		response: Response,
	) -> Result<Self> {
		let headers = response.headers();
		let retry_after = retry::retry_after(headers);
		let async_operation = header_url(&resource, headers.get(AZURE_ASYNC_OPERATION))?;
		let location = header_url(&resource, headers.get(LOCATION))?;
		let accepted = response.status() == StatusCode::ACCEPTED;
		let body = read_json(response).await?;
		let state = provisioning_state(body.as_ref());
		let (monitor, status) = match (async_operation, location) {
			(Some(url), _) => (Monitor::AsyncOperation(url), PollStatus::InProgress),
			(None, Some(url)) => (Monitor::Location(url), PollStatus::InProgress),
			(None, None) => match state {
				Some(state) => (Monitor::Resource, state),
				None if accepted => (Monitor::Resource, PollStatus::InProgress),
				None => (Monitor::Resource, PollStatus::Succeeded),
			},
		};
		let result = if status == PollStatus::Succeeded { body } else { None };

		obs::event_debug!(url = %resource, ?monitor, ?status, "Long-running operation started.");

		Ok(Self {
			client,
			method,
			resource,
			monitor,
			status,
			result,
			error: None,
			retry_after,
			frequency: DEFAULT_POLL_FREQUENCY,
		})
	}

	/// Sets the wait between polls used when the service sends no `Retry-After`.
	pub fn with_frequency(mut self, frequency: StdDuration) -> Self {
		self.frequency = frequency;

		self
	}

	/// Last observed state.
	pub fn status(&self) -> PollStatus {
		self.status
	}

	/// Checks the operation once.
	pub async fn poll(&mut self) -> Result<PollStatus> {
		if self.status.is_terminal() {
			return Ok(self.status);
		}

		let url = match &self.monitor {
			Monitor::AsyncOperation(url) | Monitor::Location(url) => url.clone(),
			Monitor::Resource => self.resource.clone(),
		};
		let response = self.client.execute(Method::GET, url, None).await?;
		let status_code = response.status();

		self.retry_after = retry::retry_after(response.headers());

		if let Monitor::Location(_) = self.monitor
			&& let Some(next) = header_url(&self.resource, response.headers().get(LOCATION))?
		{
			self.monitor = Monitor::Location(next);
		}

		let body = read_json(response).await?;

		self.status = match &self.monitor {
			Monitor::AsyncOperation(_) => {
				let status = body
					.as_ref()
					.and_then(|body| body.get("status"))
					.and_then(Value::as_str)
					.map(PollStatus::parse)
					.unwrap_or(PollStatus::InProgress);

				if matches!(status, PollStatus::Failed | PollStatus::Canceled) {
					self.error = Some(operation_error(body.as_ref()));
				}

				status
			},
			Monitor::Location(_) if status_code == StatusCode::ACCEPTED => PollStatus::InProgress,
			Monitor::Location(_) => {
				self.result = body;

				PollStatus::Succeeded
			},
			Monitor::Resource => {
				let status = provisioning_state(body.as_ref()).unwrap_or(PollStatus::Succeeded);

				match status {
					PollStatus::Succeeded => self.result = body,
					PollStatus::Failed | PollStatus::Canceled =>
						self.error = Some(operation_error(body.as_ref())),
					PollStatus::InProgress => (),
				}

				status
			},
		};

		obs::event_debug!(
			url = %self.resource,
			status = ?self.status,
			"Polled long-running operation."
		);

		Ok(self.status)
	}

	/// Polls until the operation finishes and returns the final resource, if any.
	///
	/// `Failed` and `Canceled` become [`Error::Response`] carrying the operation's error code.
	pub async fn wait(mut self) -> Result<Option<Value>> {
		while !self.status.is_terminal() {
			tokio::time::sleep(self.retry_after.unwrap_or(self.frequency)).await;
			self.poll().await?;
		}

		match self.status {
			PollStatus::Succeeded => self.final_result().await,
			status => {
				let (code, message) = self.error.take().unwrap_or_else(|| {
					(None, format!("long-running operation finished as {status:?}"))
				});

				Err(ResponseError { status: StatusCode::OK.as_u16(), code, message }.into())
			},
		}
	}

	/// [`Poller::wait`], decoding the final resource into `T`.
	pub async fn wait_for<T>(self) -> Result<Option<T>>
	where
		T: DeserializeOwned,
	{
		match self.wait().await? {
			Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
				Error::from(ResponseError {
					status: StatusCode::OK.as_u16(),
					code: None,
					message: format!("unexpected operation result: {e}"),
				})
			}),
			None => Ok(None),
		}
	}

	// After an `Azure-AsyncOperation` finishes, PUT and PATCH results live on the resource.
	async fn final_result(mut self) -> Result<Option<Value>> {
		if let Monitor::AsyncOperation(_) = self.monitor
			&& matches!(self.method, Method::PUT | Method::PATCH)
		{
			return self.client.get_url(self.resource.clone()).await.map(Some);
		}

		Ok(self.result.take())
	}
}

fn header_url(
	base: &Url,
	value: Option<&reqwest::header::HeaderValue>,
) -> Result<Option<Url>, ConfigError> {
	let Some(raw) = value.and_then(|value| value.to_str().ok()).map(str::trim) else {
		return Ok(None);
	};

	if raw.is_empty() {
		return Ok(None);
	}

	base.join(raw)
		.map(Some)
		.map_err(|source| ConfigError::InvalidUrl { what: "operation monitor", source })
}

async fn read_json(response: Response) -> Result<Option<Value>> {
	let status = response.status().as_u16();
	let body = response
		.bytes()
		.await
		.map_err(|e| crate::error::TransportError::network("the service endpoint", e))?;

	if body.iter().all(u8::is_ascii_whitespace) {
		return Ok(None);
	}

	arm::decode_slice(status, &body).map(Some)
}

fn provisioning_state(body: Option<&Value>) -> Option<PollStatus> {
	body?
		.pointer("/properties/provisioningState")
		.and_then(Value::as_str)
		.map(PollStatus::parse)
}

fn operation_error(body: Option<&Value>) -> (Option<String>, String) {
	let error = body.and_then(|body| body.get("error"));
	let code = error.and_then(|e| e.get("code")).and_then(Value::as_str).map(str::to_owned);
	let message = error
		.and_then(|e| e.get("message"))
		.and_then(Value::as_str)
		.unwrap_or("long-running operation failed")
		.to_owned();

	(code, message)
}
