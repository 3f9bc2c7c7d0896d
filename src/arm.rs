//! Azure Resource Manager plumbing on top of the bearer [`Pipeline`].
//!
//! [`ArmClient`] sends JSON requests to resource paths and decodes the answers. Failures carry
//! the ARM `error.code`. Collections come back through [`Pager`] and long-running operations
//! through [`Poller`].

pub mod pager;
pub mod path;
pub mod poller;

pub use pager::Pager;
pub use path::ResourcePath;
pub use poller::{PollStatus, Poller};

// crates.io
use reqwest::{Method, Response, header::CONTENT_TYPE};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	credential::TokenCredential,
	error::{ConfigError, ResponseError, TransportError},
	policy::{BearerTokenPolicy, Pipeline},
};

/// Public cloud ARM endpoint.
pub const PUBLIC_CLOUD_ENDPOINT: &str = "https://management.azure.com/";

/// JSON client for one ARM endpoint.
#[derive(Clone, Debug)]
pub struct ArmClient {
	endpoint: Url,
	pipeline: Pipeline,
}
impl ArmClient {
	/// Creates a client for `endpoint` sending through `pipeline`.
	pub fn new(endpoint: Url, pipeline: Pipeline) -> Self {
		Self { endpoint, pipeline }
	}

	/// Public cloud client authorized by `credential` for the ARM `.default` scope.
	pub fn public_cloud(credential: Arc<dyn TokenCredential>) -> Result<Self> {
		let endpoint = Url::parse(PUBLIC_CLOUD_ENDPOINT)
			.map_err(|source| ConfigError::InvalidUrl { what: "ARM endpoint", source })?;
		let scope = format!("{PUBLIC_CLOUD_ENDPOINT}.default");
		let pipeline = Pipeline::new(ReqwestClient::default())
			.with_bearer(BearerTokenPolicy::new(credential, [scope]));

		Ok(Self::new(endpoint, pipeline))
	}

	/// Endpoint paths are joined onto.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	/// `GET`s `path` and decodes the body.
	pub async fn get<T>(&self, path: &ResourcePath) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let response = self.execute(Method::GET, path.to_url(&self.endpoint)?, None).await?;

		decode(response).await
	}

	/// `PUT`s `body` to `path` and decodes the answer.
	///
	/// Use [`ArmClient::begin_put`] for resources whose creation runs as an operation.
	pub async fn put<B, T>(&self, path: &ResourcePath, body: &B) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		let url = path.to_url(&self.endpoint)?;
		let response = self.execute(Method::PUT, url, Some(encode(body)?)).await?;

		decode(response).await
	}

	/// `PATCH`es `path` with `body` and decodes the answer.
	pub async fn patch<B, T>(&self, path: &ResourcePath, body: &B) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		let url = path.to_url(&self.endpoint)?;
		let response = self.execute(Method::PATCH, url, Some(encode(body)?)).await?;

		decode(response).await
	}

	/// `DELETE`s `path`, accepting any success status.
	pub async fn delete(&self, path: &ResourcePath) -> Result<()> {
		self.execute(Method::DELETE, path.to_url(&self.endpoint)?, None).await.map(drop)
	}

	/// Starts a `PUT` and returns a poller tracking the operation.
	pub async fn begin_put<B>(&self, path: &ResourcePath, body: &B) -> Result<Poller>
	where
		B: ?Sized + Serialize,
	{
		let url = path.to_url(&self.endpoint)?;
		let response = self.execute(Method::PUT, url.clone(), Some(encode(body)?)).await?;

		Poller::from_response(self.clone(), Method::PUT, url, response).await
	}

	/// Starts a `DELETE` and returns a poller tracking the operation.
	pub async fn begin_delete(&self, path: &ResourcePath) -> Result<Poller> {
		let url = path.to_url(&self.endpoint)?;
		let response = self.execute(Method::DELETE, url.clone(), None).await?;

		Poller::from_response(self.clone(), Method::DELETE, url, response).await
	}

	/// Lists the collection at `path` page by page.
	pub fn list<T>(&self, path: &ResourcePath) -> Result<Pager<T>>
	where
		T: DeserializeOwned,
	{
		Ok(Pager::new(self.clone(), path.to_url(&self.endpoint)?))
	}

	pub(crate) async fn get_url<T>(&self, url: Url) -> Result<T>
	where
		T: DeserializeOwned,
	{
		decode(self.execute(Method::GET, url, None).await?).await
	}

	// Sends one request; non-success statuses become `Error::Response`.
	pub(crate) async fn execute(
		&self,
		method: Method,
		url: Url,
		body: Option<Vec<u8>>,
	) -> Result<Response> {
		let mut builder = self.pipeline.client().request(method, url);

		if let Some(body) = body {
			builder = builder.header(CONTENT_TYPE, "application/json").body(body);
		}

		let response = self.pipeline.send(builder.build().map_err(ConfigError::from)?).await?;

		if response.status().is_success() {
			Ok(response)
		} else {
			Err(response_error(response).await)
		}
	}
}

#[derive(Deserialize)]
struct ErrorEnvelope {
	#[serde(default)]
	error: Option<ErrorDetail>,
	#[serde(default)]
	code: Option<String>,
	#[serde(default)]
	message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorDetail {
	#[serde(default)]
	code: Option<String>,
	#[serde(default)]
	message: Option<String>,
}

/// Turns a failed response into [`ResponseError`], reading ARM's `{"error": {code, message}}`.
pub(crate) async fn response_error(response: Response) -> Error {
	let status = response.status();
	let body = match response.bytes().await {
		Ok(body) => body,
		Err(e) => return TransportError::network("the service endpoint", e).into(),
	};

	parse_error(status.as_u16(), &body, status.canonical_reason().unwrap_or("unknown status"))
		.into()
}

fn parse_error(status: u16, body: &[u8], reason: &str) -> ResponseError {
	let (code, message) = match serde_json::from_slice::<ErrorEnvelope>(body) {
		Ok(ErrorEnvelope { error: Some(detail), .. }) => (detail.code, detail.message),
		Ok(ErrorEnvelope { error: None, code, message }) => (code, message),
		Err(_) => (None, None),
	};
	let message = message
		.or_else(|| {
			let raw = String::from_utf8_lossy(body).trim().to_owned();

			(!raw.is_empty()).then_some(raw)
		})
		.unwrap_or_else(|| reason.to_owned());

	ResponseError { status, code, message }
}

pub(crate) async fn decode<T>(response: Response) -> Result<T>
where
	T: DeserializeOwned,
{
	let status = response.status().as_u16();
	let body = response
		.bytes()
		.await
		.map_err(|e| TransportError::network("the service endpoint", e))?;

	decode_slice(status, &body)
}

pub(crate) fn decode_slice<T>(status: u16, body: &[u8]) -> Result<T>
where
	T: DeserializeOwned,
{
	let de = &mut serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(de).map_err(|e| {
		ResponseError { status, code: None, message: format!("unexpected response body: {e}") }
			.into()
	})
}

fn encode<B>(body: &B) -> Result<Vec<u8>>
where
	B: ?Sized + Serialize,
{
	serde_json::to_vec(body).map_err(|e| ConfigError::RequestBody(e).into())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn arm_errors_keep_code_and_message() {
		let err = parse_error(
			404,
			br#"{"error":{"code":"ResourceGroupNotFound","message":"Resource group 'rg' could not be found."}}"#,
			"Not Found",
		);

		assert_eq!(err.code.as_deref(), Some("ResourceGroupNotFound"));
		assert_eq!(err.message, "Resource group 'rg' could not be found.");

		let err =
			parse_error(400, br#"{"code":"InvalidApiVersion","message":"bad"}"#, "Bad Request");

		assert_eq!(err.code.as_deref(), Some("InvalidApiVersion"));
		assert_eq!(parse_error(502, b"upstream down", "Bad Gateway").message, "upstream down");
		assert_eq!(parse_error(503, b"", "Service Unavailable").message, "Service Unavailable");
	}

	#[test]
	fn decode_errors_name_the_field() {
		#[derive(Debug, Deserialize)]
		struct Resource {
			#[allow(dead_code)]
			location: String,
		}

		let err = decode_slice::<Resource>(200, br#"{"location":7}"#)
			.expect_err("A number is not a location.");

		assert!(matches!(&err, Error::Response(e) if e.message.contains("location")));
	}
}
