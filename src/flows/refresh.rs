//! Refresh-token exchanges and how their outcomes land in the registry.
//!
//! [`Rotator::refresh_key`] performs exactly one `grant_type=refresh_token` call and classifies
//! the result; it never retries and never persists. The caller (usually the sync cycle) applies
//! the outcome with [`apply_refresh_outcome`] and owns any retry policy.

// self
use crate::{
	_prelude::*,
	auth::{KeyId, KeyRecord, KeyStatus},
	flows::Rotator,
	http::TokenHttpClient,
	oauth::{RefreshClient, RefreshedTokens, TransportErrorMapper},
	obs::{CycleKind, CycleSpan},
	registry::{Registry, RotationEvent, RotationEventKind},
};

/// Three-way result of a refresh attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// The provider issued new tokens.
	Refreshed(RefreshedTokens),
	/// The provider permanently rejected the refresh token.
	InvalidGrant {
		/// Provider-supplied reason.
		reason: String,
	},
	/// Temporary failure; the key stays as it is.
	Transient(String),
}

impl<C, M> Rotator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Exchanges `record`'s refresh token for a new access token.
	pub async fn refresh_key(&self, record: &KeyRecord) -> RefreshOutcome {
		self.refresh_key_at(record, OffsetDateTime::now_utc()).await
	}

	/// [`Rotator::refresh_key`] with `expires_in` measured from `now`.
	pub async fn refresh_key_at(&self, record: &KeyRecord, now: OffsetDateTime) -> RefreshOutcome {
		let span = CycleSpan::new(CycleKind::Sync, "refresh_key");

		span.instrument(async move {
			let Some(refresh_token) = record.refresh_token.as_ref().filter(|secret| !secret.is_blank())
			else {
				return RefreshOutcome::Transient("missing refresh token".into());
			};

			self.metrics.record_refresh_attempt();

			let client = match <RefreshClient<C, M>>::new(
				&self.descriptor,
				self.http_client.clone(),
				self.transport_mapper.clone(),
			) {
				Ok(client) => client,
				Err(e) => {
					self.metrics.record_refresh_failure();

					return RefreshOutcome::Transient(e.to_string());
				},
			};
			let outcome = match client.refresh(self.strategy.as_ref(), refresh_token.expose(), now).await {
				Ok(tokens) => RefreshOutcome::Refreshed(tokens),
				Err(Error::InvalidGrant { reason }) => RefreshOutcome::InvalidGrant { reason },
				Err(Error::InvalidClient { reason }) => {
					tracing::warn!(%reason, "Token endpoint rejected the client; treating the grant as dead.");

					RefreshOutcome::InvalidGrant { reason }
				},
				Err(e) => RefreshOutcome::Transient(e.to_string()),
			};

			match &outcome {
				RefreshOutcome::Refreshed(_) => self.metrics.record_refresh_success(),
				_ => self.metrics.record_refresh_failure(),
			}

			outcome
		})
		.await
	}
}

/// Applies a refresh outcome to the record `key_id`, logging the matching rotation event.
///
/// Returns `true` when the registry changed.
pub fn apply_refresh_outcome(
	registry: &mut Registry,
	key_id: &KeyId,
	outcome: &RefreshOutcome,
	now: OffsetDateTime,
) -> bool {
	let Some(record) = registry.keys.get_mut(key_id) else {
		return false;
	};
	let event = match outcome {
		RefreshOutcome::Refreshed(tokens) => {
			record.replace_tokens(
				tokens.access_token.clone(),
				tokens.refresh_token.clone(),
				tokens.expires_at,
			);

			if matches!(record.status, KeyStatus::Expired | KeyStatus::Invalid) {
				record.status = KeyStatus::Active;
			}

			tracing::info!(key = %key_id.short(), "Refreshed access token.");

			RotationEvent::new(now, RotationEventKind::KeyRefreshed).with_key(key_id.clone())
		},
		RefreshOutcome::InvalidGrant { reason } => {
			record.status = KeyStatus::Invalid;

			tracing::warn!(key = %key_id.short(), %reason, "Refresh token was revoked.");

			RotationEvent::new(now, RotationEventKind::RefreshTokenInvalid)
				.with_key(key_id.clone())
				.with_reason(reason.clone())
		},
		RefreshOutcome::Transient(reason) => {
			tracing::warn!(key = %key_id.short(), %reason, "Refresh failed transiently.");

			return false;
		},
	};

	registry.append_event(event);

	true
}
