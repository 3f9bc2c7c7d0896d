//! Creates a resource group through a mock Azure Resource Manager endpoint and waits for the
//! long-running operation to finish.

// std
use std::{sync::Arc, time::Duration as StdDuration};
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use time::{Duration, OffsetDateTime};
// self
use azure_identity_broker::{
	arm::{ArmClient, ResourcePath},
	auth::AccessToken,
	credential::StaticCredential,
	policy::{BearerTokenPolicy, Pipeline},
	reqwest::Client,
	url::Url,
};

const GROUP_PATH: &str = "/subscriptions/demo-sub/resourceGroups/demo-rg";

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let create_mock = server
		.mock_async(|when, then| {
			when.method(PUT).path(GROUP_PATH);
			then.status(201)
				.header("azure-asyncoperation", "/operations/demo-op")
				.header("retry-after-ms", "100");
		})
		.await;
	let operation_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/operations/demo-op");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"status\":\"Succeeded\"}");
		})
		.await;
	let group_mock = server
		.mock_async(|when, then| {
			when.method(GET).path(GROUP_PATH);
			then.status(200).header("content-type", "application/json").body(
				"{\"name\":\"demo-rg\",\"location\":\"westeurope\",\"properties\":{\"provisioningState\":\"Succeeded\"}}",
			);
		})
		.await;
	let credential = Arc::new(StaticCredential::new(AccessToken::new(
		"demo-access",
		OffsetDateTime::now_utc() + Duration::hours(1),
	)));
	let pipeline = Pipeline::new(
		Client::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()?,
	)
	.with_bearer(BearerTokenPolicy::new(credential, ["https://management.azure.com/.default"]));
	let endpoint = Url::parse(&server.base_url().replacen("http://", "https://", 1))?;
	let client = ArmClient::new(endpoint, pipeline);
	let path = ResourcePath::subscription("demo-sub", "2021-04-01").resource_group("demo-rg");
	let poller = client.begin_put(&path, &serde_json::json!({ "location": "westeurope" })).await?;

	println!("Operation started: {:?}.", poller.status());

	let group = poller.with_frequency(StdDuration::from_millis(100)).wait().await?;

	println!("Resource group: {}.", serde_json::to_string_pretty(&group)?);

	create_mock.assert_async().await;
	operation_mock.assert_async().await;
	group_mock.assert_async().await;

	Ok(())
}
