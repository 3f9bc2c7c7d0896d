//! Azure identity for Rust: single-flight token caching, ordered credential chains, managed
//! identity, developer CLIs, and an ARM-ready bearer pipeline in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod arm;
pub mod auth;
pub mod authority;
pub mod cache;
pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod policy;
pub mod store;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
