//! Quota-aware rotation for fleets of interchangeable OAuth credentials: discover keys from every
//! source, track their usage windows, refresh expiring tokens, and fail over before a key runs dry.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod audit;
pub mod auth;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod poller;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod revive;
pub mod source;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{env, process};
	// self
	use crate::{
		flows::Rotator,
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
		policy::RotationPolicy,
		provider::ProviderDescriptor,
		store::{MemoryStore, RotationStore},
	};

	/// Rotator type alias used by reqwest-backed integration tests.
	pub type ReqwestTestRotator = Rotator<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.timeout(std::time::Duration::from_secs(5))
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Builds a descriptor whose endpoints all live under `base` (typically an `httpmock` server).
	pub fn test_descriptor(base: &str) -> ProviderDescriptor {
		let join = |path: &str| {
			Url::parse(&format!("{}{path}", base.trim_end_matches('/')))
				.expect("Mock endpoint should parse successfully.")
		};

		ProviderDescriptor::builder("test-client")
			.usage_endpoint(join("/api/oauth/usage"))
			.profile_endpoint(join("/api/oauth/profile"))
			.token_endpoint(join("/v1/oauth/token"))
			.build()
			.expect("Test descriptor should build successfully.")
	}

	/// Constructs a [`Rotator`] backed by an in-memory store, the default policy, and the
	/// reqwest transport used across integration tests.
	pub fn build_reqwest_test_rotator(
		descriptor: ProviderDescriptor,
	) -> (ReqwestTestRotator, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn RotationStore> = store_backend.clone();
		let rotator = Rotator::with_http_client(
			store,
			descriptor,
			RotationPolicy::default(),
			test_reqwest_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
		);

		(rotator, store_backend)
	}

	/// Returns a unique path under the system temp directory.
	pub fn temp_path(label: &str) -> PathBuf {
		let unique = format!(
			"quota_rotator_{label}_{}_{}",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, BTreeSet, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		path::{Path, PathBuf},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _, tokio as _};
