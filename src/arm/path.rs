//! ARM resource paths.

// crates.io
use url::ParseError;
// self
use crate::{_prelude::*, error::ConfigError};

/// `/subscriptions/{id}/resourceGroups/{rg}/providers/{ns}/{type}/{name}` plus `api-version`.
///
/// Segments are percent-encoded when the path is joined onto an endpoint, so names containing
/// spaces or slashes stay single segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePath {
	segments: Vec<String>,
	api_version: String,
}
impl ResourcePath {
	/// Path rooted at the tenant level, e.g. `/providers/Microsoft.Resources/operations`.
	pub fn root(api_version: impl Into<String>) -> Self {
		Self { segments: Vec::new(), api_version: api_version.into() }
	}

	/// `/subscriptions/{subscription_id}`.
	pub fn subscription(
		subscription_id: impl Into<String>,
		api_version: impl Into<String>,
	) -> Self {
		Self::root(api_version).segment("subscriptions").segment(subscription_id)
	}

	/// Appends `resourceGroups/{name}`.
	pub fn resource_group(self, name: impl Into<String>) -> Self {
		self.segment("resourceGroups").segment(name)
	}

	/// Appends `providers/{namespace}`.
	pub fn provider(self, namespace: impl Into<String>) -> Self {
		self.segment("providers").segment(namespace)
	}

	/// Appends `{resource_type}/{name}`.
	pub fn resource(self, resource_type: impl Into<String>, name: impl Into<String>) -> Self {
		self.segment(resource_type).segment(name)
	}

	/// Appends one raw segment, e.g. a collection name to list.
	pub fn segment(mut self, segment: impl Into<String>) -> Self {
		self.segments.push(segment.into());

		self
	}

	/// `api-version` sent with every request for this path.
	pub fn api_version(&self) -> &str {
		&self.api_version
	}

	/// Joins the path onto `endpoint` and adds `api-version`.
	pub fn to_url(&self, endpoint: &Url) -> Result<Url, ConfigError> {
		let mut url = endpoint.clone();

		url.set_query(None);
		url.path_segments_mut()
			.map_err(|_| ConfigError::InvalidUrl {
				what: "ARM endpoint",
				source: ParseError::RelativeUrlWithCannotBeABaseBase,
			})?
			.pop_if_empty()
			.extend(&self.segments);
		url.query_pairs_mut().append_pair("api-version", &self.api_version);

		Ok(url)
	}
}
impl Display for ResourcePath {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		for segment in &self.segments {
			write!(f, "/{segment}")?;
		}

		Ok(())
	}
}
