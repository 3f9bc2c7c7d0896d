//! Transport primitives for token endpoint exchanges.
//!
//! [`TokenHttpClient`] is the only seam between the OAuth layer and an HTTP stack. Handles it
//! returns record the last response status and request id in a [`ResponseMetadataSlot`] so
//! token endpoint failures can be reported with the HTTP details Entra attached to them.

// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::header::HeaderMap;
// self
use crate::{_prelude::*, policy::RetryOptions};

/// Header Entra and ARM use to identify a request in service logs.
pub const REQUEST_ID_HEADER: &str = "x-ms-request-id";

/// HTTP transport capable of executing token endpoint exchanges.
///
/// Implementations are shared behind `Arc` across credentials. The handles they return own
/// everything a request needs so the futures stay `Send`.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle tied to a [`ResponseMetadataSlot`].
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds a handle that records response details in `slot`.
	///
	/// Handles must clear the slot before sending and store metadata once a response arrives.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Details of the most recent token endpoint response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// HTTP status code, if a response arrived.
	pub status: Option<u16>,
	/// Value of the `x-ms-request-id` header.
	pub request_id: Option<String>,
}
impl ResponseMetadata {
	/// Captures status and request id from a response.
	pub fn from_response(status: u16, headers: &HeaderMap) -> Self {
		let request_id = headers
			.get(REQUEST_ID_HEADER)
			.and_then(|value| value.to_str().ok())
			.map(str::to_owned);

		Self { status: Some(status), request_id }
	}
}

/// Thread-safe slot sharing [`ResponseMetadata`] between transport and error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Takes the captured metadata, leaving the slot empty.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// reqwest-backed [`TokenHttpClient`] that retries transient failures.
///
/// Token endpoints answer directly, so the wrapped client should not follow redirects.
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient {
	client: ReqwestClient,
	retry: RetryOptions,
}
impl ReqwestHttpClient {
	/// Wraps an existing reqwest client with the default retry options.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client, retry: RetryOptions::default() }
	}

	/// Overrides the retry options applied to every token request.
	pub fn with_retry(mut self, retry: RetryOptions) -> Self {
		self.retry = retry;

		self
	}

	/// Borrows the wrapped reqwest client.
	pub fn client(&self) -> &ReqwestClient {
		&self.client
	}

	/// Retry options applied to token requests.
	pub fn retry(&self) -> &RetryOptions {
		&self.retry
	}
}
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = InstrumentedHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		InstrumentedHandle(Arc::new(Instrumented {
			client: self.client.clone(),
			retry: self.retry.clone(),
			slot,
		}))
	}
}

struct Instrumented {
	client: ReqwestClient,
	retry: RetryOptions,
	slot: ResponseMetadataSlot,
}

/// Handle returned by [`ReqwestHttpClient`]; runs each exchange through the retry policy.
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<Instrumented>);
impl Debug for InstrumentedHandle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("InstrumentedHandle(..)")
	}
}
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let inner = Arc::clone(&self.0);

		Box::pin(async move {
			inner.slot.take();

			let request = request.try_into().map_err(Box::new)?;
			let response = crate::policy::send_with_retry(&inner.client, request, &inner.retry)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();

			inner.slot.store(ResponseMetadata::from_response(status.as_u16(), &headers));

			let mut converted =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*converted.status_mut() = status;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}
