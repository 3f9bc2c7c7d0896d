// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use color_eyre::Result;
use time::{Duration, OffsetDateTime};
// self
use azure_identity_broker::{
	auth::{AccessToken, ScopeSet},
	cache::{CacheKey, TokenCache, TokenSyncer},
	error::Error,
};

fn key(scope: &str) -> Result<CacheKey> {
	Ok(CacheKey::new("contoso", ScopeSet::new([scope])?, false))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_fetch() -> Result<()> {
	let cache = Arc::new(TokenCache::new());
	let fetches = Arc::new(AtomicUsize::new(0));
	let key = key("https://vault.azure.net/.default")?;
	let mut tasks = Vec::new();

	for _ in 0..50 {
		let cache = cache.clone();
		let fetches = fetches.clone();
		let key = key.clone();

		tasks.push(tokio::spawn(async move {
			cache
				.get_or_fetch(&key, false, || async {
					fetches.fetch_add(1, Ordering::SeqCst);
					tokio::time::sleep(std::time::Duration::from_millis(50)).await;

					Ok(AccessToken::new("shared", OffsetDateTime::now_utc() + Duration::hours(1)))
				})
				.await
		}));
	}

	for task in tasks {
		assert_eq!(task.await??.token.expose(), "shared");
	}

	assert_eq!(fetches.load(Ordering::SeqCst), 1);
	assert_eq!(cache.metrics().fetches(), 1);

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refreshable_token_is_renewed_once_while_others_reuse_it() -> Result<()> {
	let syncer = Arc::new(TokenSyncer::new());
	let fetches = Arc::new(AtomicUsize::new(0));
	let mut tasks = Vec::new();

	syncer.prime(AccessToken::new("stale", OffsetDateTime::now_utc() + Duration::seconds(60)));

	for _ in 0..50 {
		let syncer = syncer.clone();
		let fetches = fetches.clone();

		tasks.push(tokio::spawn(async move {
			syncer
				.get_token(|| async {
					fetches.fetch_add(1, Ordering::SeqCst);
					tokio::time::sleep(std::time::Duration::from_millis(200)).await;

					Ok(AccessToken::new("renewed", OffsetDateTime::now_utc() + Duration::hours(1)))
				})
				.await
		}));
	}

	let mut tokens = Vec::new();

	for task in tasks {
		tokens.push(task.await??.token.expose().to_owned());
	}

	assert_eq!(fetches.load(Ordering::SeqCst), 1);
	assert_eq!(tokens.iter().filter(|t| *t == "renewed").count(), 1);
	assert_eq!(tokens.iter().filter(|t| *t == "stale").count(), 49);
	assert_eq!(syncer.metrics().stale_reuses(), 49);
	assert!(!syncer.is_updating());

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_renewal_reaches_only_the_refreshing_caller() -> Result<()> {
	let syncer = Arc::new(TokenSyncer::new());
	let fetches = Arc::new(AtomicUsize::new(0));
	let mut tasks = Vec::new();

	syncer.prime(AccessToken::new("stale", OffsetDateTime::now_utc() + Duration::seconds(60)));

	for _ in 0..50 {
		let syncer = syncer.clone();
		let fetches = fetches.clone();

		tasks.push(tokio::spawn(async move {
			syncer
				.get_token(|| async {
					fetches.fetch_add(1, Ordering::SeqCst);
					tokio::time::sleep(std::time::Duration::from_millis(200)).await;

					Err(Error::authentication_failed("Test", "renewal rejected"))
				})
				.await
		}));
	}

	let (mut failures, mut reused) = (0, 0);

	for task in tasks {
		match task.await? {
			Ok(token) => {
				assert_eq!(token.token.expose(), "stale");

				reused += 1;
			},
			Err(e) => {
				assert!(matches!(e, Error::AuthenticationFailed(_)));

				failures += 1;
			},
		}
	}

	assert_eq!((failures, reused), (1, 49));
	assert_eq!(fetches.load(Ordering::SeqCst), 1);
	assert!(!syncer.is_updating());
	assert_eq!(syncer.cached().map(|t| t.token.expose().to_owned()).as_deref(), Some("stale"));

	Ok(())
}

#[tokio::test]
async fn keys_are_cached_independently() -> Result<()> {
	let cache = TokenCache::new();
	let vault = key("https://vault.azure.net/.default")?;
	let storage = key("https://storage.azure.com/.default")?;

	for (key, value) in [(&vault, "vault"), (&storage, "storage")] {
		let token = cache
			.get_or_fetch(key, false, || async move {
				Ok(AccessToken::new(value, OffsetDateTime::now_utc() + Duration::hours(1)))
			})
			.await?;

		assert_eq!(token.token.expose(), value);
	}

	let cached = cache
		.get_or_fetch(&vault, false, || async {
			Err(Error::authentication_failed("Test", "a cached token must not be fetched again"))
		})
		.await?;

	assert_eq!(cached.token.expose(), "vault");
	assert_eq!(cache.metrics().fetches(), 2);

	Ok(())
}

#[tokio::test]
async fn forced_refresh_replaces_the_cached_token() -> Result<()> {
	let cache = TokenCache::new();
	let key = key("https://vault.azure.net/.default")?;
	let expires_on = OffsetDateTime::now_utc() + Duration::hours(1);

	cache.get_or_fetch(&key, false, || async { Ok(AccessToken::new("old", expires_on)) }).await?;

	let refreshed =
		cache.get_or_fetch(&key, true, || async { Ok(AccessToken::new("new", expires_on)) }).await?;

	assert_eq!(refreshed.token.expose(), "new");

	let err = cache
		.get_or_fetch(&key, true, || async { Err(Error::authentication_failed("Test", "denied")) })
		.await
		.expect_err("A failed forced refresh is returned to its caller.");

	assert!(matches!(err, Error::AuthenticationFailed(_)));

	let kept = cache
		.get_or_fetch(&key, false, || async { Ok(AccessToken::new("unused", expires_on)) })
		.await?;

	assert_eq!(kept.token.expose(), "new");

	Ok(())
}
