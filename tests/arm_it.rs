// std
use std::{sync::Arc, time::Duration as StdDuration};
// crates.io
use httpmock::prelude::*;
use parking_lot::Mutex;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
// self
use azure_identity_broker::{
	arm::{ArmClient, PollStatus, ResourcePath},
	auth::{AccessToken, TokenRequestOptions},
	credential::{TokenCredential, TokenFuture},
	error::Error,
	policy::{BearerTokenOptions, BearerTokenPolicy, Pipeline, RetryOptions},
	url::Url,
};

mod common;

const API_VERSION: &str = "2023-07-01";
const GROUP_PATH: &str = "/subscriptions/sub-1/resourceGroups/rg-1";
const ACCOUNT_PATH: &str =
	"/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Storage/storageAccounts/acct";
// {"access_token":{"nbf":{"essential":true}}}
const CLAIMS: &str = "eyJhY2Nlc3NfdG9rZW4iOnsibmJmIjp7ImVzc2VudGlhbCI6dHJ1ZX19fQ==";

/// Hands out `first` until a request carries claims, then `claimed`.
#[derive(Default)]
struct RecordingCredential {
	requests: Mutex<Vec<TokenRequestOptions>>,
}
impl TokenCredential for RecordingCredential {
	fn name(&self) -> &'static str {
		"RecordingCredential"
	}

	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		Box::pin(async move {
			self.requests.lock().push(options.clone());

			let token = if options.claims.is_some() { "claimed" } else { "first" };

			Ok(AccessToken::new(token, OffsetDateTime::now_utc() + Duration::hours(1)))
		})
	}
}

#[derive(Debug, Deserialize)]
struct Group {
	name: String,
	location: String,
}

fn client(server: &MockServer, credential: Arc<RecordingCredential>) -> ArmClient {
	let bearer = BearerTokenPolicy::new(credential, ["https://management.azure.com/.default"])
		.with_options(BearerTokenOptions::default().with_insecure_allow_http(true));
	let pipeline = Pipeline::new(common::insecure_client())
		.with_retry(RetryOptions::none())
		.with_bearer(bearer);
	let endpoint = Url::parse(&server.base_url()).expect("Mock endpoint should parse.");

	ArmClient::new(endpoint, pipeline)
}

fn group() -> ResourcePath {
	ResourcePath::subscription("sub-1", API_VERSION).resource_group("rg-1")
}

fn account() -> ResourcePath {
	group().provider("Microsoft.Storage").resource("storageAccounts", "acct")
}

#[tokio::test]
async fn get_sends_the_bearer_token_and_api_version() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path(GROUP_PATH)
				.query_param("api-version", API_VERSION)
				.header("authorization", "Bearer first");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(serde_json::json!({ "name": "rg-1", "location": "westeurope" }));
		})
		.await;
	let credential = Arc::new(RecordingCredential::default());
	let group: Group = client(&server, credential.clone())
		.get(&group())
		.await
		.expect("Resource group should be returned.");

	assert_eq!(group.name, "rg-1");
	assert_eq!(group.location, "westeurope");

	mock.assert_async().await;

	let requests = credential.requests.lock();

	assert_eq!(requests.len(), 1);
	assert!(requests[0].enable_cae);
}

#[tokio::test]
async fn claims_challenge_is_answered_once() {
	let server = MockServer::start_async().await;
	let challenged = server
		.mock_async(|when, then| {
			when.method(GET).path(GROUP_PATH).header("authorization", "Bearer first");
			then.status(401).header(
				"www-authenticate",
				format!(
					"Bearer realm=\"\", error=\"insufficient_claims\", error_description=\"CAE\", claims=\"{CLAIMS}\""
				),
			);
		})
		.await;
	let answered = server
		.mock_async(|when, then| {
			when.method(GET).path(GROUP_PATH).header("authorization", "Bearer claimed");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(serde_json::json!({ "name": "rg-1", "location": "westeurope" }));
		})
		.await;
	let credential = Arc::new(RecordingCredential::default());
	let group: Group = client(&server, credential.clone())
		.get(&group())
		.await
		.expect("The replayed request should succeed.");

	assert_eq!(group.name, "rg-1");

	challenged.assert_calls_async(1).await;
	answered.assert_calls_async(1).await;

	let requests = credential.requests.lock();

	assert_eq!(requests.len(), 2);
	assert_eq!(
		requests[1].claims.as_deref(),
		Some(r#"{"access_token":{"nbf":{"essential":true}}}"#)
	);
}

#[tokio::test]
async fn arm_errors_carry_the_service_code() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path(GROUP_PATH);
			then.status(404).header("content-type", "application/json").json_body(
				serde_json::json!({
					"error": {
						"code": "ResourceGroupNotFound",
						"message": "Resource group 'rg-1' could not be found."
					}
				}),
			);
		})
		.await;

	let err = client(&server, Arc::default())
		.get::<Group>(&group())
		.await
		.expect_err("A missing group must fail.");
	let Error::Response(response) = &err else {
		panic!("Expected a response error, got {err:?}.");
	};

	assert_eq!(response.status, 404);
	assert_eq!(response.code.as_deref(), Some("ResourceGroupNotFound"));
	assert!(!err.is_retriable());
}

#[tokio::test]
async fn pager_follows_next_links() {
	let server = MockServer::start_async().await;
	let first = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/subscriptions/sub-1/resourcegroups")
				.query_param("api-version", API_VERSION);
			then.status(200).header("content-type", "application/json").json_body(
				serde_json::json!({
					"value": [{ "name": "rg-1", "location": "westeurope" }],
					"nextLink": "/subscriptions/sub-1/resourcegroups/page2?api-version=2023-07-01"
				}),
			);
		})
		.await;
	let second = server
		.mock_async(|when, then| {
			when.method(GET).path("/subscriptions/sub-1/resourcegroups/page2");
			then.status(200).header("content-type", "application/json").json_body(
				serde_json::json!({ "value": [{ "name": "rg-2", "location": "eastus" }] }),
			);
		})
		.await;
	let groups: Vec<Group> = client(&server, Arc::default())
		.list(&ResourcePath::subscription("sub-1", API_VERSION).segment("resourcegroups"))
		.expect("Pager should build.")
		.collect_all()
		.await
		.expect("Every page should load.");

	assert_eq!(groups.iter().map(|g| g.name.as_str()).collect::<Vec<_>>(), ["rg-1", "rg-2"]);

	first.assert_async().await;
	second.assert_async().await;
}

#[tokio::test]
async fn put_poller_reads_the_resource_after_the_operation() {
	let server = MockServer::start_async().await;
	let created = server
		.mock_async(|when, then| {
			when.method(PUT)
				.path(ACCOUNT_PATH)
				.json_body(serde_json::json!({ "location": "westeurope" }));
			then.status(201)
				.header("content-type", "application/json")
				.header("azure-asyncoperation", "/operations/op-1?api-version=2023-07-01")
				.header("retry-after-ms", "10")
				.json_body(
					serde_json::json!({ "properties": { "provisioningState": "Creating" } }),
				);
		})
		.await;
	let operation = server
		.mock_async(|when, then| {
			when.method(GET).path("/operations/op-1");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(serde_json::json!({ "status": "Succeeded" }));
		})
		.await;
	let resource = server
		.mock_async(|when, then| {
			when.method(GET).path(ACCOUNT_PATH);
			then.status(200).header("content-type", "application/json").json_body(
				serde_json::json!({
					"name": "acct",
					"location": "westeurope",
					"properties": { "provisioningState": "Succeeded" }
				}),
			);
		})
		.await;
	let poller = client(&server, Arc::default())
		.begin_put(&account(), &serde_json::json!({ "location": "westeurope" }))
		.await
		.expect("The operation should start.");

	assert_eq!(poller.status(), PollStatus::InProgress);

	let account: Option<Group> = poller
		.with_frequency(StdDuration::from_millis(10))
		.wait_for()
		.await
		.expect("The operation should succeed.");

	assert_eq!(account.map(|a| a.name).as_deref(), Some("acct"));

	created.assert_async().await;
	operation.assert_async().await;
	resource.assert_async().await;
}

#[tokio::test]
async fn delete_poller_follows_location() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(DELETE).path(ACCOUNT_PATH);
			then.status(202).header("location", "/operations/del-1").header("retry-after", "0");
		})
		.await;

	let location = server
		.mock_async(|when, then| {
			when.method(GET).path("/operations/del-1");
			then.status(204);
		})
		.await;
	let result = client(&server, Arc::default())
		.begin_delete(&account())
		.await
		.expect("The delete should start.")
		.with_frequency(StdDuration::from_millis(10))
		.wait()
		.await
		.expect("The delete should finish.");

	assert!(result.is_none());

	location.assert_async().await;
}

#[tokio::test]
async fn failed_operations_surface_their_error() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(PUT).path(ACCOUNT_PATH);
			then.status(201)
				.header("azure-asyncoperation", "/operations/op-2")
				.header("retry-after-ms", "10");
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/operations/op-2");
			then.status(200).header("content-type", "application/json").json_body(
				serde_json::json!({
					"status": "Failed",
					"error": { "code": "QuotaExceeded", "message": "Not enough storage accounts." }
				}),
			);
		})
		.await;

	let err = client(&server, Arc::default())
		.begin_put(&account(), &serde_json::json!({ "location": "westeurope" }))
		.await
		.expect("The operation should start.")
		.wait()
		.await
		.expect_err("A failed operation must surface.");
	let Error::Response(response) = &err else {
		panic!("Expected a response error, got {err:?}.");
	};

	assert_eq!(response.code.as_deref(), Some("QuotaExceeded"));
	assert_eq!(response.message, "Not enough storage accounts.");
}
