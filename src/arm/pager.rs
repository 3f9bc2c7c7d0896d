//! ARM collection paging (`{"value": [...], "nextLink": ...}`).

// std
use std::marker::PhantomData;
// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{_prelude::*, arm::ArmClient, error::ConfigError};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
	#[serde(default = "Vec::new")]
	value: Vec<T>,
	#[serde(default)]
	next_link: Option<String>,
}

/// Walks a collection one page at a time by following `nextLink`.
#[derive(Debug)]
pub struct Pager<T> {
	client: ArmClient,
	next: Option<Url>,
	_item: PhantomData<fn() -> T>,
}
impl<T> Pager<T>
where
	T: DeserializeOwned,
{
	pub(crate) fn new(client: ArmClient, first: Url) -> Self {
		Self { client, next: Some(first), _item: PhantomData }
	}

	/// Fetches the next page, or `None` once the collection is exhausted.
	pub async fn next_page(&mut self) -> Result<Option<Vec<T>>> {
		let Some(url) = self.next.take() else {
			return Ok(None);
		};
		let page: Page<T> = self.client.get_url(url).await?;

		self.next = match page.next_link.as_deref().map(str::trim) {
			Some(link) if !link.is_empty() => Some(
				self.client
					.endpoint()
					.join(link)
					.map_err(|source| ConfigError::InvalidUrl { what: "nextLink", source })?,
			),
			_ => None,
		};

		Ok(Some(page.value))
	}

	/// Collects every remaining item.
	pub async fn collect_all(mut self) -> Result<Vec<T>> {
		let mut items = Vec::new();

		while let Some(page) = self.next_page().await? {
			items.extend(page);
		}

		Ok(items)
	}
}
