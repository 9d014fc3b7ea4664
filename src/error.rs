//! Rotator-level error types shared across flows, providers, sources, and stores.

// self
use crate::_prelude::*;

/// Rotator-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical rotator error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry on the next cycle.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Provider rejected the refresh token permanently.
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider- or rotator-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or the client identifier is unknown to the provider.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or rotator-supplied reason string.
		reason: String,
	},
}

/// Configuration and validation failures raised by the rotator.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// A policy value read from the environment could not be used.
	#[error("Policy variable `{name}` has an invalid value `{value}`: {reason}.")]
	InvalidPolicy {
		/// Environment variable name.
		name: &'static str,
		/// Raw value supplied.
		value: String,
		/// Why the value was rejected.
		reason: &'static str,
	},
	/// Cached record is missing a refresh secret.
	#[error("Key record is missing a refresh token.")]
	MissingRefreshToken,
	/// Key record builder validation failed.
	#[error("Unable to build key record.")]
	KeyBuild(#[from] crate::auth::KeyRecordBuilderError),
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry next cycle).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Endpoint returned an unexpected response: {message}.")]
	Endpoint {
		/// Provider- or rotator-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Endpoint responded with malformed JSON that could not be parsed.
	#[error("Endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}
/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn invalid_policy_message_names_variable() {
		let err: Error = ConfigError::InvalidPolicy {
			name: "QUOTA_ROTATOR_HIGH_USAGE_PCT",
			value: "abc".into(),
			reason: "expected a number",
		}
		.into();

		assert!(matches!(err, Error::Config(_)));
		assert!(err.to_string().contains("QUOTA_ROTATOR_HIGH_USAGE_PCT"));
	}
}
