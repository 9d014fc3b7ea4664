//! Lightweight monitor cycle: probe the active key, adapt the poll interval, rotate early.

// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	auth::KeyId,
	flows::{Rotator, common},
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, CycleKind, CycleOutcome, CycleSpan},
	poller,
	registry::{self, Registry},
	store::{PendingAudit, ThrottleState},
};

/// Why the monitor moved the active pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RotationTrigger {
	/// No key was active yet.
	Initial,
	/// The active key reached the exhausted threshold.
	Exhausted,
	/// The active key crossed the high-usage threshold.
	HighUsage,
	/// The active key is projected to run out before the check after next.
	Predictive,
	/// The provider rejected the active key and no refresh could recover it.
	Unauthorized,
}
impl RotationTrigger {
	/// Returns a stable label suitable for logs and audit lines.
	pub const fn as_str(self) -> &'static str {
		match self {
			RotationTrigger::Initial => "initial",
			RotationTrigger::Exhausted => "exhausted",
			RotationTrigger::HighUsage => "high_usage",
			RotationTrigger::Predictive => "predictive",
			RotationTrigger::Unauthorized => "unauthorized",
		}
	}

	/// Whether the rotation starts the usage cooldown.
	pub const fn is_usage_triggered(self) -> bool {
		matches!(self, RotationTrigger::Exhausted | RotationTrigger::HighUsage | RotationTrigger::Predictive)
	}
}

/// What a monitor cycle did.
#[derive(Clone, Debug, PartialEq)]
pub enum MonitorOutcome {
	/// The poll interval has not elapsed yet.
	Throttled {
		/// Earliest instant the next probe will run.
		next_check: OffsetDateTime,
	},
	/// No key is active and none is usable.
	NoActiveKey,
	/// The active key could not be probed; nothing changed.
	ProbeFailed {
		/// Active key.
		key_id: KeyId,
		/// Probe failure label.
		error: String,
	},
	/// The active key stays.
	Steady {
		/// Active key.
		key_id: KeyId,
		/// Its highest window utilization.
		usage: f64,
		/// Interval until the next probe.
		interval: Duration,
	},
	/// The active pointer moved.
	Rotated {
		/// Previously active key.
		from: Option<KeyId>,
		/// Newly active key.
		to: KeyId,
		/// Why it moved.
		trigger: RotationTrigger,
	},
	/// The active key is exhausted and no alternative exists.
	AllExhausted {
		/// Exhausted active key, if any.
		key_id: Option<KeyId>,
	},
}

/// Result of verifying the previous rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationVerification {
	/// Consumers see the intended key.
	pub installed: bool,
	/// The intended key answers a fresh probe.
	pub healthy: bool,
}

impl<C, M> Rotator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Runs one monitor cycle. Only local store failures surface as errors.
	pub async fn monitor(&self) -> Result<MonitorOutcome> {
		self.monitor_at(OffsetDateTime::now_utc()).await
	}

	/// [`Rotator::monitor`] evaluated at `now`.
	pub async fn monitor_at(&self, now: OffsetDateTime) -> Result<MonitorOutcome> {
		const KIND: CycleKind = CycleKind::Monitor;

		obs::record_cycle_outcome(KIND, CycleOutcome::Attempt);

		let span = CycleSpan::new(KIND, "monitor");
		let result = span
			.instrument(async move {
				let _cycle = self.cycle_guard.lock().await;
				let mut throttle = self.store.read_throttle();

				if !throttle.due(now) {
					let next_check = throttle.last_check.map_or(now, |last| last + throttle.interval());

					return Ok(MonitorOutcome::Throttled { next_check });
				}

				let previous_audit = throttle.pending_audit.take();
				let mut registry = self.store.read();
				let before = registry.clone();
				let outcome = self.evaluate_active(&mut registry, &mut throttle, now).await;

				if registry != before {
					self.store.write(&registry)?;
				}
				if let MonitorOutcome::Rotated { from, to, trigger } = &outcome {
					self.metrics.record_rotation();
					self.install_active(&registry);

					if trigger.is_usage_triggered() {
						throttle.last_rotation = Some(now);
					}

					throttle.reset_history();
					throttle.current_interval = poller::poll_interval(
						registry
							.keys
							.get(to)
							.and_then(|record| record.fresh_usage(now, self.policy.health_max_age))
							.map_or(0.0, |usage| usage.max_utilization()),
					)
					.whole_seconds();
					throttle.pending_audit = Some(self.open_audit(from.clone(), to.clone(), now, trigger.as_str()));
				}

				throttle.last_check = Some(now);

				if let Some(audit) = previous_audit {
					self.verify_rotation(&audit, &registry, now).await;
				}

				self.store.write_throttle(&throttle)?;

				Ok(outcome)
			})
			.await;

		obs::record_cycle_outcome(KIND, match &result {
			Ok(_) => CycleOutcome::Success,
			Err(_) => CycleOutcome::Failure,
		});

		result
	}

	async fn evaluate_active(
		&self,
		registry: &mut Registry,
		throttle: &mut ThrottleState,
		now: OffsetDateTime,
	) -> MonitorOutcome {
		let Some(active_id) = registry.active().map(|record| record.key_id.clone()) else {
			return self.switch(registry, None, now, RotationTrigger::Initial);
		};
		let Some(token) = registry.keys.get(&active_id).map(|record| record.access_token.clone()) else {
			return MonitorOutcome::NoActiveKey;
		};
		let mut probe = self.probe_at(&token, now).await;

		if probe.is_unauthorized() {
			match self.recover_unauthorized(registry, &active_id, now).await {
				Some(retry) => probe = retry,
				None => {
					return self.switch(registry, Some(active_id), now, RotationTrigger::Unauthorized);
				},
			}
		}

		let Some(usage) = probe.usage else {
			return MonitorOutcome::ProbeFailed {
				key_id: active_id,
				error: probe.error.unwrap_or_else(|| "no_usage".into()),
			};
		};
		let current = usage.max_utilization();
		let interval = poller::poll_interval(current);

		self.record_usage(registry, &active_id, usage, now);
		throttle.record_sample(current, now);
		throttle.current_interval = interval.whole_seconds();

		if current >= self.policy.exhausted_pct {
			return self.switch(registry, Some(active_id), now, RotationTrigger::Exhausted);
		}

		let steady = MonitorOutcome::Steady { key_id: active_id.clone(), usage: current, interval };

		if poller::cooldown_active(throttle, &self.policy, now) {
			tracing::debug!(key = %active_id.short(), usage = current, "Rotation cooldown active.");

			return steady;
		}
		if current >= self.policy.high_usage_pct {
			return match registry::select_active_key(registry, &self.policy, now) {
				Some(target) if target != active_id =>
					self.switch_to(registry, Some(active_id), target, now, RotationTrigger::HighUsage),
				_ => steady,
			};
		}

		let velocity = poller::velocity(&throttle.usage_history);

		if poller::should_rotate_predictively(current, velocity, interval) {
			tracing::info!(key = %active_id.short(), usage = current, velocity, "Key projected to run out.");

			if let Some(target) = registry::best_alternative(registry, &self.policy, now, Some(&active_id)) {
				return self.switch_to(registry, Some(active_id), target, now, RotationTrigger::Predictive);
			}
		}

		steady
	}

	fn switch(
		&self,
		registry: &mut Registry,
		from: Option<KeyId>,
		now: OffsetDateTime,
		trigger: RotationTrigger,
	) -> MonitorOutcome {
		match registry::select_active_key(registry, &self.policy, now) {
			Some(target) if Some(&target) != from.as_ref() => self.switch_to(registry, from, target, now, trigger),
			_ => {
				common::note_all_exhausted(registry, now);

				match from {
					Some(key_id) => MonitorOutcome::AllExhausted { key_id: Some(key_id) },
					None => MonitorOutcome::NoActiveKey,
				}
			},
		}
	}

	fn switch_to(
		&self,
		registry: &mut Registry,
		from: Option<KeyId>,
		to: KeyId,
		now: OffsetDateTime,
		trigger: RotationTrigger,
	) -> MonitorOutcome {
		if common::rotate(registry, &to, now, trigger.as_str()) {
			MonitorOutcome::Rotated { from, to, trigger }
		} else {
			MonitorOutcome::NoActiveKey
		}
	}

	/// Checks that a previous rotation took effect and records the verdict in the audit log.
	pub async fn verify_rotation(
		&self,
		audit: &PendingAudit,
		registry: &Registry,
		now: OffsetDateTime,
	) -> RotationVerification {
		let target = registry.keys.get(&audit.to_key);
		let installed = match (&self.sink, target) {
			(Some(sink), Some(record)) => sink.holds(record),
			(Some(_), None) => false,
			(None, _) => registry.active_key_id.as_ref() == Some(&audit.to_key),
		};
		let healthy = match target {
			Some(record) => self.probe_at(&record.access_token, now).await.valid,
			None => false,
		};
		let from = audit.from_key.as_ref().map_or("none", |id| id.short()).to_owned();

		tracing::info!(from = %from, to = %audit.to_key.short(), installed, healthy, "Verified rotation.");

		if let Some(log) = &self.audit {
			let rotated_at = audit.rotated_at.format(&Rfc3339).unwrap_or_default();
			let fields = [
				("from", from),
				("to", audit.to_key.short().to_owned()),
				("reason", audit.reason.clone()),
				("rotated_at", rotated_at),
				("installed", installed.to_string()),
				("healthy", healthy.to_string()),
			];

			if let Err(e) = log.record(now, "rotation_verified", &fields) {
				tracing::warn!(error = %e, "Failed to append audit line.");
			}
		}

		RotationVerification { installed, healthy }
	}
}
