//! Full sync cycle: discover, refresh, probe, resolve accounts, dedup, select, persist, install.

// self
use crate::{
	_prelude::*,
	auth::{KeyId, KeyStatus, UsageSnapshot},
	flows::{ProbeResult, RefreshOutcome, Rotator, apply_refresh_outcome, common},
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, CycleKind, CycleOutcome, CycleSpan},
	registry::{self, Registry, RotationEvent, RotationEventKind, UpsertOutcome},
	source,
};

/// Knobs for a single sync cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncOptions {
	/// Probe every live key's usage.
	pub probe: bool,
	/// Publish the active key through the configured sink.
	pub install: bool,
}
impl SyncOptions {
	/// Enables or disables usage probes.
	pub fn with_probe(mut self, probe: bool) -> Self {
		self.probe = probe;

		self
	}

	/// Enables or disables credential installation.
	pub fn with_install(mut self, install: bool) -> Self {
		self.install = install;

		self
	}
}
impl Default for SyncOptions {
	fn default() -> Self {
		Self { probe: true, install: true }
	}
}

/// What a sync cycle did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
	/// Credentials read from sources.
	pub discovered: usize,
	/// Keys seen for the first time.
	pub added: Vec<KeyId>,
	/// Keys whose tokens were refreshed.
	pub refreshed: Vec<KeyId>,
	/// Keys that became invalid this cycle.
	pub invalidated: Vec<KeyId>,
	/// Keys probed for usage.
	pub probed: usize,
	/// `(removed, survivor)` pairs merged by account.
	pub merged: Vec<(KeyId, KeyId)>,
	/// Dead keys pruned.
	pub pruned: Vec<KeyId>,
	/// Active key before the cycle.
	pub previous_active: Option<KeyId>,
	/// Active key after the cycle.
	pub active: Option<KeyId>,
	/// Whether the sink now holds the active key.
	pub installed: bool,
}
impl SyncReport {
	/// Whether the active key changed.
	pub fn rotated(&self) -> bool {
		self.active.is_some() && self.active != self.previous_active
	}
}

impl<C, M> Rotator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Runs a full sync cycle. Idempotent; only local store failures surface as errors.
	pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport> {
		self.sync_at(options, OffsetDateTime::now_utc()).await
	}

	/// [`Rotator::sync`] evaluated at `now`.
	pub async fn sync_at(&self, options: SyncOptions, now: OffsetDateTime) -> Result<SyncReport> {
		const KIND: CycleKind = CycleKind::Sync;

		obs::record_cycle_outcome(KIND, CycleOutcome::Attempt);

		let span = CycleSpan::new(KIND, "sync");
		let result = span
			.instrument(async move {
				let _cycle = self.cycle_guard.lock().await;
				let mut report = SyncReport::default();
				let credentials = source::aggregate(&self.sources, now);
				let mut registry = self.store.read();

				report.discovered = credentials.len();
				report.previous_active = registry.active_key_id.clone();

				for credential in credentials {
					let label = credential.source_label.clone();
					let record = match credential.into_record(now) {
						Ok(record) => record,
						Err(e) => {
							tracing::warn!(source = %label, error = %e, "Discarded unusable credential.");

							continue;
						},
					};

					if let UpsertOutcome::Added(id) = registry.upsert(record, now) {
						tracing::info!(key = %id.short(), source = %label, "Discovered new key.");
						registry.append_event(
							RotationEvent::new(now, RotationEventKind::KeyAdded)
								.with_key(id.clone())
								.with_reason(format!("source:{label}")),
						);
						report.added.push(id);
					}
				}

				self.refresh_expiring(&mut registry, now, &mut report).await;

				if options.probe {
					report.probed = self.probe_keys(&mut registry, now, &mut report.invalidated).await;
				}

				self.resolve_accounts(&mut registry).await;

				report.merged = registry::dedupe(&mut registry, now).merged;
				report.pruned = registry::prune(&mut registry, now);

				self.rotate_before_expiry(&mut registry, now);

				let usage_rotation = self.apply_selection(&mut registry, now);

				self.store.write(&registry)?;

				report.active = registry.active_key_id.clone();

				if options.install {
					report.installed = self.install_active(&registry);
				}
				if report.rotated() {
					if let Some(to) = report.active.clone() {
						let mut throttle = self.store.read_throttle();

						if usage_rotation {
							throttle.last_rotation = Some(now);
						}

						throttle.reset_history();
						throttle.pending_audit =
							Some(self.open_audit(report.previous_active.clone(), to, now, "sync"));
						self.store.write_throttle(&throttle)?;
					}
				}

				Ok(report)
			})
			.await;

		obs::record_cycle_outcome(KIND, match &result {
			Ok(_) => CycleOutcome::Success,
			Err(_) => CycleOutcome::Failure,
		});

		result
	}

	async fn refresh_expiring(&self, registry: &mut Registry, now: OffsetDateTime, report: &mut SyncReport) {
		let due: Vec<KeyId> = registry
			.keys
			.values()
			.filter(|record| !record.status.is_dead())
			.filter(|record| record.expires_within(now, self.policy.pre_expiry_buffer))
			.map(|record| record.key_id.clone())
			.collect();

		for id in due {
			let Some(record) = registry.keys.get(&id).cloned() else {
				continue;
			};

			if !record.can_refresh() {
				if record.is_expired_at(now) && record.status != KeyStatus::Expired {
					if let Some(target) = registry.keys.get_mut(&id) {
						target.status = KeyStatus::Expired;
					}

					tracing::info!(key = %id.short(), "Key expired without a refresh token.");
				}

				continue;
			}

			let outcome = self.refresh_key_at(&record, now).await;

			apply_refresh_outcome(registry, &id, &outcome, now);

			match outcome {
				RefreshOutcome::Refreshed(_) => report.refreshed.push(id),
				RefreshOutcome::InvalidGrant { .. } => report.invalidated.push(id),
				RefreshOutcome::Transient(_) =>
					if record.is_expired_at(now) {
						if let Some(target) = registry.keys.get_mut(&id) {
							target.status = KeyStatus::Expired;
						}
					},
			}
		}
	}

	/// Probes every selectable key, recovering unauthorized ones through a refresh.
	///
	/// Returns the number of keys probed and appends newly invalid keys to `invalidated`.
	pub(crate) async fn probe_keys(
		&self,
		registry: &mut Registry,
		now: OffsetDateTime,
		invalidated: &mut Vec<KeyId>,
	) -> usize {
		let targets: Vec<KeyId> = registry
			.keys
			.values()
			.filter(|record| record.status.is_selectable())
			.map(|record| record.key_id.clone())
			.collect();
		let mut probed = 0;

		for id in targets {
			let Some(token) = registry.keys.get(&id).map(|record| record.access_token.clone()) else {
				continue;
			};
			let mut result = self.probe_at(&token, now).await;

			probed += 1;

			if result.is_unauthorized() {
				match self.recover_unauthorized(registry, &id, now).await {
					Some(retry) => result = retry,
					None => {
						invalidated.push(id);

						continue;
					},
				}
			}

			if let Some(usage) = result.usage {
				self.record_usage(registry, &id, usage, now);
			}
		}

		if probed > 0 {
			registry.append_event(
				RotationEvent::new(now, RotationEventKind::HealthCheck)
					.with_reason(format!("probed:{probed}")),
			);
		}

		probed
	}

	/// Attempts a refresh after a 401 and re-probes with the new token.
	///
	/// Returns the retry probe, or `None` when the key was marked invalid.
	pub(crate) async fn recover_unauthorized(
		&self,
		registry: &mut Registry,
		id: &KeyId,
		now: OffsetDateTime,
	) -> Option<ProbeResult> {
		let record = registry.keys.get(id).cloned()?;
		let outcome = if record.can_refresh() {
			self.refresh_key_at(&record, now).await
		} else {
			RefreshOutcome::InvalidGrant { reason: "unauthorized".into() }
		};

		match &outcome {
			RefreshOutcome::Refreshed(tokens) => {
				let token = tokens.access_token.clone();

				apply_refresh_outcome(registry, id, &outcome, now);

				let retry = self.probe_at(&token, now).await;

				if retry.is_unauthorized() {
					self.invalidate(registry, id, now, "unauthorized_after_refresh");

					return None;
				}

				Some(retry)
			},
			RefreshOutcome::InvalidGrant { .. } if record.can_refresh() => {
				apply_refresh_outcome(registry, id, &outcome, now);

				None
			},
			RefreshOutcome::InvalidGrant { .. } => {
				self.invalidate(registry, id, now, "unauthorized");

				None
			},
			RefreshOutcome::Transient(_) => Some(ProbeResult::default()),
		}
	}

	pub(crate) fn invalidate(&self, registry: &mut Registry, id: &KeyId, now: OffsetDateTime, reason: &str) {
		if let Some(record) = registry.keys.get_mut(id) {
			record.status = KeyStatus::Invalid;
		}

		tracing::warn!(key = %id.short(), reason, "Key rejected by the provider.");
		registry.append_event(
			RotationEvent::new(now, RotationEventKind::RefreshTokenInvalid)
				.with_key(id.clone())
				.with_reason(reason),
		);
	}

	/// Stores a fresh usage snapshot, logging `key_exhausted` on the transition into exhaustion.
	pub(crate) fn record_usage(
		&self,
		registry: &mut Registry,
		id: &KeyId,
		usage: UsageSnapshot,
		now: OffsetDateTime,
	) {
		let Some(record) = registry.keys.get_mut(id) else {
			return;
		};
		let was_exhausted = record.status == KeyStatus::Exhausted;

		record.apply_usage(usage.clone(), self.policy.exhausted_pct);

		if record.status == KeyStatus::Exhausted && !was_exhausted {
			let reset = usage.earliest_reset_above(self.policy.exhausted_pct);

			tracing::warn!(key = %id.short(), usage = usage.max_utilization(), ?reset, "Key exhausted.");
			registry.append_event(
				RotationEvent::new(now, RotationEventKind::KeyExhausted)
					.with_key(id.clone())
					.with_usage(Some(usage)),
			);
		}
	}

	async fn resolve_accounts(&self, registry: &mut Registry) {
		let unresolved: Vec<KeyId> = registry
			.keys
			.values()
			.filter(|record| record.account_uuid.is_none() && !record.status.is_dead())
			.map(|record| record.key_id.clone())
			.collect();

		for id in unresolved {
			let Some(token) = registry.keys.get(&id).map(|record| record.access_token.clone()) else {
				continue;
			};
			let Some(profile) = self.fetch_profile(&token).await else {
				continue;
			};

			if let Some(record) = registry.keys.get_mut(&id) {
				tracing::debug!(key = %id.short(), account = %profile.account_uuid.short(), "Resolved key account.");
				record.account_uuid = Some(profile.account_uuid);
				record.account_email = profile.email;
			}
		}
	}

	fn rotate_before_expiry(&self, registry: &mut Registry, now: OffsetDateTime) {
		let Some(active) = registry.active() else {
			return;
		};

		if !active.expires_within(now, self.policy.pre_expiry_buffer) {
			return;
		}

		let from = active.key_id.clone();

		if let Some(target) = registry::best_alternative(registry, &self.policy, now, Some(&from)) {
			if common::rotate(registry, &target, now, "pre_expiry") {
				self.metrics.record_rotation();
			}
		}
	}

	/// Applies the selection algorithm; returns `true` for a usage-triggered rotation.
	pub(crate) fn apply_selection(&self, registry: &mut Registry, now: OffsetDateTime) -> bool {
		let Some(target) = registry::select_active_key(registry, &self.policy, now) else {
			common::note_all_exhausted(registry, now);

			return false;
		};
		let had_active = registry.active().is_some();
		let reason = if had_active { "usage" } else { "initial" };

		if common::rotate(registry, &target, now, reason) {
			self.metrics.record_rotation();

			return had_active;
		}

		false
	}
}
