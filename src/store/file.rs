//! JSON file [`TokenStore`] that survives restarts.
//!
//! Every mutation rewrites the whole snapshot to a sibling temporary file and renames it over
//! the original, so readers never observe a half-written file. On Unix the file is created
//! with `0600` permissions since it holds refresh tokens.

// std
use std::{
	fs::{self, File, OpenOptions},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenFamily, TokenRecord},
	store::{self, CompareAndSwapOutcome, StoreError, StoreFuture, StoreKey, TokenStore},
};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
	version: u32,
	records: Vec<TokenRecord>,
}

/// Persists records to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<HashMap<StoreKey, TokenRecord>>>,
}
impl FileStore {
	/// Opens (or creates) a store at `path`, loading existing records.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();
		let records = load(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(records)) })
	}

	/// Location of the snapshot.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn persist(&self, contents: &HashMap<StoreKey, TokenRecord>) -> Result<(), StoreError> {
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| backend("create", parent, e))?;
		}

		let snapshot =
			Snapshot { version: SNAPSHOT_VERSION, records: contents.values().cloned().collect() };
		let bytes = serde_json::to_vec_pretty(&snapshot)
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?;
		let tmp = self.path.with_extension("tmp");

		{
			let mut file = create_private(&tmp).map_err(|e| backend("create", &tmp, e))?;

			file.write_all(&bytes).map_err(|e| backend("write", &tmp, e))?;
			file.sync_all().map_err(|e| backend("sync", &tmp, e))?;
		}

		fs::rename(&tmp, &self.path).map_err(|e| backend("replace", &self.path, e))
	}

	// Applies `mutate` to a copy and keeps it only once the snapshot is on disk.
	fn commit<T>(
		&self,
		mutate: impl FnOnce(&mut HashMap<StoreKey, TokenRecord>) -> (T, bool),
	) -> Result<T, StoreError> {
		let mut map = self.inner.write();
		let mut staged = map.clone();
		let (value, changed) = mutate(&mut staged);

		if changed {
			self.persist(&staged)?;

			*map = staged;
		}

		Ok(value)
	}
}
impl TokenStore for FileStore {
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.commit(|map| {
				map.insert(StoreKey::new(&record.family, &record.scope), record);

				((), true)
			})
		})
	}

	fn fetch<'a>(
		&'a self,
		family: &'a TokenFamily,
		scope: &'a ScopeSet,
	) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move { Ok(self.inner.read().get(&StoreKey::new(family, scope)).cloned()) })
	}

	fn fetch_latest<'a>(&'a self, family: &'a TokenFamily) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move { Ok(store::latest_in_map(self.inner.read().values(), family)) })
	}

	fn compare_and_swap_refresh<'a>(
		&'a self,
		family: &'a TokenFamily,
		scope: &'a ScopeSet,
		expected_refresh: Option<&'a str>,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			self.commit(|map| {
				let outcome = store::swap_in_map(
					map,
					StoreKey::new(family, scope),
					expected_refresh,
					replacement,
				);

				(outcome, outcome == CompareAndSwapOutcome::Updated)
			})
		})
	}

	fn revoke<'a>(
		&'a self,
		family: &'a TokenFamily,
		scope: &'a ScopeSet,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move {
			self.commit(|map| match map.get_mut(&StoreKey::new(family, scope)) {
				Some(record) => {
					record.revoke(instant);

					(Some(record.clone()), true)
				},
				None => (None, false),
			})
		})
	}
}

fn load(path: &Path) -> Result<HashMap<StoreKey, TokenRecord>, StoreError> {
	let bytes = match fs::read(path) {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
		Err(e) => return Err(backend("read", path, e)),
	};

	if bytes.is_empty() {
		return Ok(HashMap::new());
	}

	let mut de = serde_json::Deserializer::from_slice(&bytes);
	let snapshot: Snapshot =
		serde_path_to_error::deserialize(&mut de).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})?;

	if snapshot.version != SNAPSHOT_VERSION {
		return Err(StoreError::Serialization {
			message: format!(
				"Unsupported snapshot version {} in {}",
				snapshot.version,
				path.display()
			),
		});
	}

	Ok(snapshot
		.records
		.into_iter()
		.map(|record| (StoreKey::new(&record.family, &record.scope), record))
		.collect())
}

fn create_private(path: &Path) -> std::io::Result<File> {
	let mut options = OpenOptions::new();

	options.write(true).create(true).truncate(true);

	#[cfg(unix)]
	{
		use std::os::unix::fs::OpenOptionsExt;

		options.mode(0o600);
	}

	options.open(path)
}

fn backend(action: &str, path: &Path, e: std::io::Error) -> StoreError {
	StoreError::Backend { message: format!("Failed to {action} {}: {e}", path.display()) }
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;
	use crate::auth::{AccessToken, ClientId, TenantId};

	fn temp_path(name: &str) -> PathBuf {
		env::temp_dir().join(format!(
			"azure_identity_file_store_{name}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		))
	}

	fn fixture() -> (TokenFamily, ScopeSet, TokenRecord) {
		let family = TokenFamily::new(
			TenantId::new("contoso").expect("Tenant fixture should be valid."),
			ClientId::new("04b07795-8ddb-461a-bbee-02f9e1bf7b46")
				.expect("Client fixture should be valid."),
		);
		let scope = ScopeSet::new(["https://vault.azure.net/.default"])
			.expect("Scope fixture should be valid.");
		let expires_on = OffsetDateTime::now_utc() + Duration::hours(1);
		let access = AccessToken::new("access-token", expires_on);
		let record = TokenRecord::new(family.clone(), scope.clone(), access)
			.with_refresh_token("refresh-token");

		(family, scope, record)
	}

	#[tokio::test]
	async fn records_survive_reopen() {
		let path = temp_path("reopen");
		let (family, scope, record) = fixture();
		let store = FileStore::open(&path).expect("Store should open.");

		store.save(record).await.expect("Record should save.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Store should reopen.");
		let fetched = reopened
			.fetch(&family, &scope)
			.await
			.expect("Fetch should succeed.")
			.expect("Record should survive reopen.");
		let latest = reopened
			.fetch_latest(&family)
			.await
			.expect("Latest lookup should succeed.")
			.expect("Record should be the latest.");

		assert_eq!(fetched.access_token.expose(), "access-token");
		assert_eq!(
			latest.refresh_token.map(|rt| rt.expose().to_owned()).as_deref(),
			Some("refresh-token")
		);

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;

			let mode = fs::metadata(&path).expect("Snapshot should exist.").permissions().mode();

			assert_eq!(mode & 0o777, 0o600);
		}

		fs::remove_file(&path).expect("Snapshot should be removable.");
	}

	#[tokio::test]
	async fn failed_writes_leave_memory_untouched() {
		let dir = temp_path("blocked");
		let (family, scope, record) = fixture();
		let store = FileStore::open(dir.join("store.json")).expect("Store should open.");

		// A regular file where the parent directory should be makes every write fail.
		fs::write(&dir, b"").expect("Blocking file should be written.");

		let err = store.save(record).await.expect_err("Saving under a file must fail.");

		assert!(matches!(err, StoreError::Backend { .. }));
		assert!(
			store.fetch(&family, &scope).await.expect("Fetch should succeed.").is_none(),
			"A record that was never persisted must not be served."
		);

		fs::remove_file(&dir).expect("Blocking file should be removable.");
	}

	#[test]
	fn rejects_unknown_snapshot_versions() {
		let path = temp_path("version");

		fs::write(&path, br#"{"version":99,"records":[]}"#).expect("Fixture should be written.");

		let err = FileStore::open(&path).expect_err("Unknown versions must be rejected.");

		assert!(matches!(err, StoreError::Serialization { .. }));

		fs::remove_file(&path).expect("Fixture should be removable.");
	}
}
