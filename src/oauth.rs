//! Refresh-token exchange on top of the `oauth2` crate, plus transport error mapping.

pub use oauth2;

// crates.io
use oauth2::{
	AuthType, ClientId, EndpointNotSet, EndpointSet, HttpClientError, RefreshToken,
	RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{ConfigError, TransientError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{
		EndpointKind, ProviderDescriptor, ProviderErrorContext, ProviderErrorKind,
		ProviderStrategy,
	},
};
#[cfg(feature = "reqwest")] use crate::error::TransportError;

type TokenOnlyClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Turns transport failures into rotator [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Maps `error`, raised while calling `endpoint`, using whatever `metadata` was captured.
	fn map_transport_error(
		&self,
		endpoint: EndpointKind,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// [`TransportErrorMapper`] for [`reqwest`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		endpoint: EndpointKind,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		let detail = match err {
			HttpClientError::Reqwest(inner) if inner.is_builder() => return ConfigError::from(*inner).into(),
			HttpClientError::Reqwest(inner) if inner.is_timeout() => format!("request timed out: {inner}"),
			HttpClientError::Reqwest(inner) => return TransportError::from(*inner).into(),
			HttpClientError::Http(inner) => return ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => return TransportError::Io(inner).into(),
			HttpClientError::Other(message) => message,
			_ => "unknown client failure".into(),
		};

		transient(format!("Calling the {endpoint} endpoint failed: {detail}"), meta)
	}
}

/// Tokens issued by a successful refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshedTokens {
	/// New access token.
	pub access_token: TokenSecret,
	/// New refresh token, when the provider rotated it.
	pub refresh_token: Option<TokenSecret>,
	/// Expiry computed from `expires_in`.
	pub expires_at: Option<OffsetDateTime>,
}

/// One-shot refresh client bound to a descriptor's token endpoint.
pub(crate) struct RefreshClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	inner: TokenOnlyClient,
	http_client: Arc<C>,
	mapper: Arc<M>,
}
impl<C, M> RefreshClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn new(descriptor: &ProviderDescriptor, http_client: Arc<C>, mapper: Arc<M>) -> Result<Self> {
		let token_url = TokenUrl::new(descriptor.endpoints.token.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let inner = BasicClient::new(ClientId::new(descriptor.client_id.clone()))
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody);

		Ok(Self { inner, http_client, mapper })
	}

	/// Performs a single `grant_type=refresh_token` exchange; `expires_in` counts from `now`.
	pub(crate) async fn refresh(
		&self,
		strategy: &dyn ProviderStrategy,
		refresh_token: &str,
		now: OffsetDateTime,
	) -> Result<RefreshedTokens> {
		let slot = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(slot.clone());
		let response = self
			.inner
			.exchange_refresh_token(&RefreshToken::new(refresh_token.to_owned()))
			.request_async(&handle)
			.await
			.map_err(|err| self.classify(strategy, slot.take(), err))?;
		let expires_at = response
			.expires_in()
			.map(|ttl| {
				i64::try_from(ttl.as_secs())
					.map(|secs| now + Duration::seconds(secs))
					.map_err(|_| ConfigError::ExpiresInOutOfRange)
			})
			.transpose()?;

		Ok(RefreshedTokens {
			access_token: TokenSecret::new(response.access_token().secret().as_str()),
			refresh_token: response.refresh_token().map(|token| TokenSecret::new(token.secret().as_str())),
			expires_at,
		})
	}

	fn classify(
		&self,
		strategy: &dyn ProviderStrategy,
		meta: Option<ResponseMetadata>,
		err: BasicRequestTokenError<HttpClientError<C::TransportError>>,
	) -> Error {
		let meta = meta.as_ref();
		let status = meta.and_then(|value| value.status);

		match err {
			RequestTokenError::ServerResponse(response) => oauth_error(strategy, &response, meta),
			RequestTokenError::Request(error) => self.mapper.map_transport_error(EndpointKind::Token, meta, error),
			RequestTokenError::Parse(source, body) => {
				let ctx = ProviderErrorContext::new(EndpointKind::Token)
					.with_body_preview(String::from_utf8_lossy(&body));
				let ctx = match status {
					Some(code) => ctx.with_http_status(code),
					None => ctx,
				};

				match strategy.classify_token_error(&ctx) {
					ProviderErrorKind::InvalidGrant =>
						Error::InvalidGrant { reason: "Token endpoint rejected the refresh token.".into() },
					_ => TransientError::ResponseParse { source, status }.into(),
				}
			},
			RequestTokenError::Other(message) =>
				transient(format!("Token endpoint answered unexpectedly: {message}"), meta),
		}
	}
}

fn oauth_error(
	strategy: &dyn ProviderStrategy,
	response: &BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let code = response.error().as_ref().to_owned();
	let reason = match response.error_description() {
		Some(description) => format!("{code}: {description}"),
		None => code.clone(),
	};
	let mut ctx = ProviderErrorContext::new(EndpointKind::Token).with_oauth_error(code);

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.as_str());
	}
	if let Some(status) = meta.and_then(|value| value.status) {
		ctx = ctx.with_http_status(status);
	}

	match strategy.classify_token_error(&ctx) {
		ProviderErrorKind::InvalidGrant => Error::InvalidGrant { reason },
		ProviderErrorKind::InvalidClient => Error::InvalidClient { reason },
		ProviderErrorKind::Transient => transient(format!("Token endpoint returned {reason}"), meta),
	}
}

fn transient(message: String, meta: Option<&ResponseMetadata>) -> Error {
	TransientError::Endpoint {
		message,
		status: meta.and_then(|value| value.status),
		retry_after: meta.and_then(|value| value.retry_after),
	}
	.into()
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// self
	use super::*;
	use crate::{http::ReqwestHttpClient, provider::DefaultProviderStrategy};

	#[test]
	fn builds_refresh_client_from_descriptor() {
		let descriptor =
			ProviderDescriptor::anthropic().expect("Production descriptor should validate.");
		let result = <RefreshClient<ReqwestHttpClient, ReqwestTransportErrorMapper>>::new(
			&descriptor,
			Arc::new(ReqwestHttpClient::default()),
			Arc::new(ReqwestTransportErrorMapper),
		);

		assert!(result.is_ok());
	}

	#[test]
	fn other_client_failures_are_transient_and_name_the_endpoint() {
		let err = ReqwestTransportErrorMapper.map_transport_error(
			EndpointKind::Usage,
			Some(&ResponseMetadata { status: Some(503), retry_after: Some(Duration::seconds(9)) }),
			HttpClientError::Other("boom".into()),
		);

		match err {
			Error::Transient(TransientError::Endpoint { message, status, retry_after }) => {
				assert!(message.contains("usage"));
				assert_eq!(status, Some(503));
				assert_eq!(retry_after, Some(Duration::seconds(9)));
			},
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[test]
	fn oauth_errors_follow_the_strategy() {
		let response: BasicErrorResponse =
			serde_json::from_str(r#"{"error":"invalid_grant","error_description":"revoked"}"#)
				.expect("Error fixture should parse.");

		assert!(matches!(
			oauth_error(&DefaultProviderStrategy, &response, None),
			Error::InvalidGrant { reason } if reason == "invalid_grant: revoked"
		));
	}
}
