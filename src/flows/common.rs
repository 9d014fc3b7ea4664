//! Shared helpers for rotator cycles (authorized GETs, rotations, installs).

// crates.io
use oauth2::{
	AsyncHttpClient,
	http::{Method, Request, header},
};
// self
use crate::{
	_prelude::*,
	auth::{KeyId, TokenSecret},
	flows::Rotator,
	http::{ResponseMetadataSlot, TokenHttpClient},
	oauth::TransportErrorMapper,
	provider::EndpointKind,
	registry::{Registry, RotationEvent, RotationEventKind},
	store::PendingAudit,
};

/// Status and body returned by [`Rotator::authorized_get`].
pub(crate) struct RawResponse {
	pub status: u16,
	pub body: Vec<u8>,
}

impl<C, M> Rotator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Issues a bearer-authenticated GET against one of the descriptor's endpoints.
	pub(crate) async fn authorized_get(
		&self,
		endpoint: EndpointKind,
		token: &TokenSecret,
	) -> Result<RawResponse> {
		let mut builder = Request::builder()
			.method(Method::GET)
			.uri(self.descriptor.endpoints.get(endpoint).as_str())
			.header(header::AUTHORIZATION, format!("Bearer {}", token.expose()))
			.header(header::ACCEPT, "application/json");

		if let Some(beta) = &self.descriptor.beta_header {
			builder = builder.header("anthropic-beta", beta.as_str());
		}

		let request = builder.body(Vec::new()).map_err(crate::error::ConfigError::from)?;
		let slot = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(slot.clone());
		let response = handle.call(request).await.map_err(|err| {
			self.transport_mapper.map_transport_error(endpoint, slot.take().as_ref(), err)
		})?;

		Ok(RawResponse { status: response.status().as_u16(), body: response.into_body() })
	}

	/// Builds the pending audit for a rotation and appends a `rotation` audit line.
	pub(crate) fn open_audit(
		&self,
		from_key: Option<KeyId>,
		to_key: KeyId,
		rotated_at: OffsetDateTime,
		reason: &str,
	) -> PendingAudit {
		if let Some(log) = &self.audit {
			let fields = [
				("from", from_key.as_ref().map_or("none", |id| id.short()).to_owned()),
				("to", to_key.short().to_owned()),
				("reason", reason.to_owned()),
			];

			if let Err(e) = log.record(rotated_at, "rotation", &fields) {
				tracing::warn!(error = %e, "Failed to append audit line.");
			}
		}

		PendingAudit { from_key, to_key, rotated_at, reason: reason.to_owned() }
	}

	/// Publishes the active key through the configured sink; failures are logged.
	pub(crate) fn install_active(&self, registry: &Registry) -> bool {
		let (Some(sink), Some(record)) = (&self.sink, registry.active()) else {
			return false;
		};

		if sink.holds(record) {
			return true;
		}

		match sink.install(record) {
			Ok(()) => true,
			Err(e) => {
				tracing::warn!(key = %record.key_id.short(), error = %e, "Failed to install active credential.");

				false
			},
		}
	}
}

/// Points the registry at `to`, logging a `key_switched` event.
///
/// Returns `false` when `to` is already active or unknown.
pub(crate) fn rotate(registry: &mut Registry, to: &KeyId, now: OffsetDateTime, reason: &str) -> bool {
	let from = registry.active_key_id.clone();

	if from.as_ref() == Some(to) || !registry.activate(to, now) {
		return false;
	}

	let usage = registry.keys.get(to).and_then(|record| record.last_usage.clone());
	let from_label = from.as_ref().map_or("none", |id| id.short());

	tracing::info!(from = from_label, to = %to.short(), reason, "Rotated active key.");
	registry.append_event(
		RotationEvent::new(now, RotationEventKind::KeySwitched)
			.with_key(to.clone())
			.with_reason(format!("{reason} from:{from_label}"))
			.with_usage(usage),
	);

	true
}

/// Logs `all_exhausted` unless the newest event already says so.
pub(crate) fn note_all_exhausted(registry: &mut Registry, now: OffsetDateTime) {
	if registry.latest_event().is_some_and(|event| event.kind == RotationEventKind::AllExhausted) {
		return;
	}

	tracing::warn!(keys = registry.keys.len(), "Every key is exhausted or unusable.");
	registry.append_event(RotationEvent::new(now, RotationEventKind::AllExhausted));
}
