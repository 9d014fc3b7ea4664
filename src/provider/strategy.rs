//! Classification of token-endpoint failures into permanent and transient outcomes.

// self
use crate::{_prelude::*, provider::EndpointKind};

/// Decides how the rotator treats a failed refresh exchange.
pub trait ProviderStrategy: Send + Sync {
	/// Classifies the failure described by `ctx`.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;
}

/// How a token-endpoint failure affects the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// The refresh token is dead; the key becomes invalid.
	InvalidGrant,
	/// The client itself was rejected.
	InvalidClient,
	/// Try again on a later cycle.
	Transient,
}

/// Transport-neutral facts about a failed call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Endpoint that failed.
	pub endpoint: EndpointKind,
	/// HTTP status, when a response arrived.
	pub http_status: Option<u16>,
	/// OAuth `error` code.
	pub oauth_error: Option<String>,
	/// OAuth `error_description`.
	pub error_description: Option<String>,
	/// Start of a body that was not an OAuth error document.
	pub body_preview: Option<String>,
	/// No response arrived at all.
	pub network_error: bool,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Empty context for `endpoint`.
	pub fn new(endpoint: EndpointKind) -> Self {
		Self {
			endpoint,
			http_status: None,
			oauth_error: None,
			error_description: None,
			body_preview: None,
			network_error: false,
		}
	}

	/// Records the HTTP status.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Records the OAuth `error` code.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Records the OAuth `error_description`.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Records the first [`Self::BODY_PREVIEW_LIMIT`] characters of a raw body.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		let body = body.into();
		let mut preview: String = body.chars().take(Self::BODY_PREVIEW_LIMIT).collect();

		if preview.len() < body.len() {
			preview.push('…');
		}

		self.body_preview = Some(preview);

		self
	}
}

/// OAuth error codes and body fragments, checked in order.
const KNOWN_CODES: &[(&str, ProviderErrorKind)] = &[
	("invalid_grant", ProviderErrorKind::InvalidGrant),
	("access_denied", ProviderErrorKind::InvalidGrant),
	("invalid_client", ProviderErrorKind::InvalidClient),
	("unauthorized_client", ProviderErrorKind::InvalidClient),
	("temporarily_unavailable", ProviderErrorKind::Transient),
	("server_error", ProviderErrorKind::Transient),
	("rate_limit_error", ProviderErrorKind::Transient),
	("overloaded_error", ProviderErrorKind::Transient),
];

/// Classifier used unless a rotator is given another.
///
/// Looks at the OAuth `error` code first, then for a known code inside the description or
/// body, then at the HTTP status. Network failures are always transient.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if ctx.network_error {
			return ProviderErrorKind::Transient;
		}

		let exact = ctx.oauth_error.as_deref().and_then(|code| {
			KNOWN_CODES
				.iter()
				.find(|(known, _)| code.trim().eq_ignore_ascii_case(known))
				.map(|(_, kind)| *kind)
		});

		exact
			.or_else(|| mentioned_code(ctx.error_description.as_deref()))
			.or_else(|| mentioned_code(ctx.body_preview.as_deref()))
			.unwrap_or_else(|| match ctx.http_status {
				Some(400 | 404 | 410) => ProviderErrorKind::InvalidGrant,
				Some(401) => ProviderErrorKind::InvalidClient,
				_ => ProviderErrorKind::Transient,
			})
	}
}

fn mentioned_code(text: Option<&str>) -> Option<ProviderErrorKind> {
	let lowered = text?.to_ascii_lowercase();

	KNOWN_CODES.iter().find(|(code, _)| lowered.contains(code)).map(|(_, kind)| *kind)
}
