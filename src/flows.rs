//! Rotation cycles orchestrated by [`Rotator`].

pub mod monitor;
pub mod probe;
pub mod profile;
pub mod refresh;
pub mod sync;

mod common;
mod metrics;

pub use metrics::RotatorMetrics;
pub use monitor::*;
pub use probe::*;
pub use profile::*;
pub use refresh::*;
pub use sync::*;

// self
use crate::{
	_prelude::*,
	audit::AuditLog,
	auth::{KeyId, TokenSecret},
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, CycleKind, CycleOutcome, CycleSpan},
	policy::RotationPolicy,
	provider::{DefaultProviderStrategy, ProviderDescriptor, ProviderStrategy},
	registry::best_alternative,
	source::{CredentialSink, CredentialSource},
	store::RotationStore,
};
#[cfg(feature = "reqwest")]
use crate::{error::ConfigError, http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Rotator specialized for the crate's default reqwest transport stack.
pub type ReqwestRotator = Rotator<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Credential consumers should use right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveCredential {
	/// Registry identifier of the active key.
	pub key_id: KeyId,
	/// Access token to present upstream.
	pub access_token: TokenSecret,
	/// Access token expiry, if known.
	pub expires_at: Option<OffsetDateTime>,
	/// Owning account email, once resolved.
	pub account_email: Option<String>,
}

/// Coordinates discovery, probing, refresh, and rotation of a key fleet against one provider.
///
/// The rotator owns no registry state: every operation reads the store afresh and writes it
/// back atomically, so several rotators (in one or many processes) can share a store. Cycles
/// started through the same rotator are serialized.
#[derive(Clone)]
pub struct Rotator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every outbound provider request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors.
	pub transport_mapper: Arc<M>,
	/// Shared rotation state.
	pub store: Arc<dyn RotationStore>,
	/// Provider endpoints and client identifier.
	pub descriptor: ProviderDescriptor,
	/// Classifier for token-endpoint failures.
	pub strategy: Arc<dyn ProviderStrategy>,
	/// Thresholds and timings.
	pub policy: RotationPolicy,
	/// Places keys are discovered from during sync.
	pub sources: Vec<Arc<dyn CredentialSource>>,
	/// Where the active key is published, if anywhere.
	pub sink: Option<Arc<dyn CredentialSink>>,
	/// Rotation audit trail, if enabled.
	pub audit: Option<Arc<AuditLog>>,
	/// Shared counters for probe, refresh, and rotation outcomes.
	pub metrics: Arc<RotatorMetrics>,
	pub(crate) cycle_guard: Arc<AsyncMutex<()>>,
}
impl<C, M> Rotator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a rotator that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		store: Arc<dyn RotationStore>,
		descriptor: ProviderDescriptor,
		policy: RotationPolicy,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			store,
			descriptor,
			strategy: Arc::new(DefaultProviderStrategy),
			policy,
			sources: Vec::new(),
			sink: None,
			audit: None,
			metrics: Default::default(),
			cycle_guard: Default::default(),
		}
	}

	/// Replaces the token-error classifier.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Replaces the discovery sources.
	pub fn with_sources(mut self, sources: Vec<Arc<dyn CredentialSource>>) -> Self {
		self.sources = sources;

		self
	}

	/// Publishes the active key through `sink` after every rotation.
	pub fn with_sink(mut self, sink: Arc<dyn CredentialSink>) -> Self {
		self.sink = Some(sink);

		self
	}

	/// Enables the rotation audit trail.
	pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
		self.audit = Some(Arc::new(audit));

		self
	}

	/// Returns the active credential without touching the network or the store contents.
	pub fn active_credential(&self) -> Option<ActiveCredential> {
		let registry = self.store.read();
		let record = registry.active()?;

		Some(ActiveCredential {
			key_id: record.key_id.clone(),
			access_token: record.access_token.clone(),
			expires_at: record.expires_at,
			account_email: record.account_email.clone(),
		})
	}

	/// Moves the active pointer to the best alternative key on a collaborator's request.
	///
	/// Returns the newly active key, or `None` when no alternative below the high-usage threshold
	/// exists. Requested rotations do not start the usage cooldown.
	pub async fn request_rotation(&self, reason: &str) -> Result<Option<KeyId>> {
		self.request_rotation_at(reason, OffsetDateTime::now_utc()).await
	}

	/// [`Rotator::request_rotation`] evaluated at `now`.
	pub async fn request_rotation_at(&self, reason: &str, now: OffsetDateTime) -> Result<Option<KeyId>> {
		const KIND: CycleKind = CycleKind::Rotation;

		obs::record_cycle_outcome(KIND, CycleOutcome::Attempt);

		let span = CycleSpan::new(KIND, "request_rotation");
		let result = span
			.instrument(async move {
				let _cycle = self.cycle_guard.lock().await;
				let mut registry = self.store.read();
				let from = registry.active_key_id.clone();
				let Some(target) = best_alternative(&registry, &self.policy, now, from.as_ref()) else {
					tracing::warn!(reason, "Requested rotation found no alternative key.");

					return Ok(None);
				};
				let reason = format!("requested:{reason}");

				if !common::rotate(&mut registry, &target, now, &reason) {
					return Ok(None);
				}

				self.metrics.record_rotation();
				self.store.write(&registry)?;
				self.install_active(&registry);

				let mut throttle = self.store.read_throttle();

				throttle.pending_audit = Some(self.open_audit(from, target.clone(), now, &reason));
				throttle.reset_history();
				self.store.write_throttle(&throttle)?;

				Ok(Some(target))
			})
			.await;

		obs::record_cycle_outcome(KIND, match &result {
			Ok(_) => CycleOutcome::Success,
			Err(_) => CycleOutcome::Failure,
		});

		result
	}
}
#[cfg(feature = "reqwest")]
impl Rotator<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a rotator with its own reqwest transport, bounded by `policy.request_timeout`.
	pub fn new(
		store: Arc<dyn RotationStore>,
		descriptor: ProviderDescriptor,
		policy: RotationPolicy,
	) -> Result<Self, ConfigError> {
		let http_client = ReqwestHttpClient::with_timeout(policy.request_timeout)?;

		Ok(Self::with_http_client(
			store,
			descriptor,
			policy,
			http_client,
			Arc::new(ReqwestTransportErrorMapper),
		))
	}
}
impl<C, M> Debug for Rotator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Rotator")
			.field("descriptor", &self.descriptor)
			.field("policy", &self.policy)
			.field("sources", &self.sources.iter().map(|s| s.label().to_owned()).collect::<Vec<_>>())
			.field("sink_set", &self.sink.is_some())
			.field("audit", &self.audit)
			.finish()
	}
}
