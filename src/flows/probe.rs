//! Usage probes against the provider's usage endpoint.

// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, UsageSnapshot},
	flows::Rotator,
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	provider::EndpointKind,
};

/// Error label for a 401 response.
pub const PROBE_UNAUTHORIZED: &str = "unauthorized";
/// Error label for a 2xx response whose body is not a usage document.
pub const PROBE_INVALID_RESPONSE: &str = "invalid_response";

/// Outcome of probing one key. Probes never fail; problems are reported in `error`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProbeResult {
	/// Whether the key answered with a usage document.
	pub valid: bool,
	/// Parsed usage, when valid.
	pub usage: Option<UsageSnapshot>,
	/// Raw response body, when it was JSON.
	pub raw: Option<serde_json::Value>,
	/// Failure label (`unauthorized`, `http_<code>`, `invalid_response`, or a transport message).
	pub error: Option<String>,
}
impl ProbeResult {
	fn failed(error: impl Into<String>) -> Self {
		Self { error: Some(error.into()), ..Self::default() }
	}

	/// Whether the provider rejected the token itself.
	pub fn is_unauthorized(&self) -> bool {
		self.error.as_deref() == Some(PROBE_UNAUTHORIZED)
	}
}

impl<C, M> Rotator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Reads current utilization for `access_token`.
	pub async fn probe(&self, access_token: &TokenSecret) -> ProbeResult {
		self.probe_at(access_token, OffsetDateTime::now_utc()).await
	}

	/// [`Rotator::probe`] with an explicit `checked_at` stamp.
	pub async fn probe_at(&self, access_token: &TokenSecret, now: OffsetDateTime) -> ProbeResult {
		let result = match self.authorized_get(EndpointKind::Usage, access_token).await {
			Ok(response) if response.status == 401 => ProbeResult::failed(PROBE_UNAUTHORIZED),
			Ok(response) if !(200..300).contains(&response.status) =>
				ProbeResult::failed(format!("http_{}", response.status)),
			Ok(response) => parse_usage(&response.body, now),
			Err(e) => ProbeResult::failed(e.to_string()),
		};

		self.metrics.record_probe(result.valid);

		if let Some(error) = &result.error {
			tracing::debug!(key = %access_token.key_id().short(), error, "Usage probe failed.");
		}

		result
	}
}

fn parse_usage(body: &[u8], now: OffsetDateTime) -> ProbeResult {
	let Ok(raw) = serde_json::from_slice::<serde_json::Value>(body) else {
		return ProbeResult::failed(PROBE_INVALID_RESPONSE);
	};

	match UsageSnapshot::from_response(raw.clone(), now) {
		Ok(usage) => ProbeResult { valid: true, usage: Some(usage), raw: Some(raw), error: None },
		Err(_) => ProbeResult { raw: Some(raw), ..ProbeResult::failed(PROBE_INVALID_RESPONSE) },
	}
}
