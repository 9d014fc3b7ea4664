//! Session revival after keys recover from exhaustion.
//!
//! The orchestration layer that owns sessions implements [`SessionLedger`]; the rotator decides
//! which sessions to resume and in what order, sharing one budget across all modes:
//!
//! 1. sessions interrupted recently (stale ones are discarded),
//! 2. sessions whose process died while their work item is still pending,
//! 3. paused sessions, once a fresh probe shows some key below the high-usage threshold.
//!
//! The first two modes only run while some key is usable.

// self
use crate::{
	_prelude::*,
	auth::KeyId,
	flows::Rotator,
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, CycleKind, CycleOutcome, CycleSpan},
	registry::select_active_key,
};

/// Errors raised by a [`SessionLedger`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ReviveError {
	/// The session could not be resumed.
	#[error("Session `{session_id}` could not be resumed: {message}.")]
	Rejected {
		/// Session identifier.
		session_id: String,
		/// Human-readable failure.
		message: String,
	},
	/// The ledger itself is unavailable.
	#[error("Session ledger is unavailable: {message}.")]
	Unavailable {
		/// Human-readable failure.
		message: String,
	},
}

/// Session stopped mid-turn because its key ran out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterruptedSession {
	/// Session identifier.
	pub session_id: String,
	/// Work item the session was serving.
	pub work_item: Option<String>,
	/// When the interruption happened.
	pub interrupted_at: OffsetDateTime,
}

/// Historical record of a session process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessRecord {
	/// Operating system process id.
	pub pid: u32,
	/// Session the process ran.
	pub session_id: String,
	/// Work item the process was serving.
	pub work_item: String,
}

/// Session paused deliberately while every key was high.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PausedSession {
	/// Session identifier.
	pub session_id: String,
	/// Work item the session was serving.
	pub work_item: Option<String>,
	/// When the session was paused.
	pub paused_at: OffsetDateTime,
}

/// How a session qualified for revival.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RevivalMode {
	/// Recently interrupted.
	Interrupted,
	/// Process died with its work item still pending.
	DeadProcess,
	/// Paused until quota recovered.
	Paused,
}

/// Instruction handed to [`SessionLedger::resume`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResumeRequest {
	/// Session to resume.
	pub session_id: String,
	/// Work item to continue.
	pub work_item: Option<String>,
	/// Why the session qualified.
	pub mode: RevivalMode,
	/// Key the session should run on.
	pub key_id: Option<KeyId>,
}

/// Record of sessions known to the orchestration layer.
pub trait SessionLedger
where
	Self: Send + Sync,
{
	/// Sessions interrupted by exhaustion.
	fn interrupted_sessions(&self) -> Vec<InterruptedSession>;

	/// Recently started session processes.
	fn process_history(&self) -> Vec<ProcessRecord>;

	/// Whether `pid` is still running.
	fn process_alive(&self, pid: u32) -> bool;

	/// Whether the work item still needs doing.
	fn work_item_pending(&self, work_item: &str) -> bool;

	/// Sessions paused while quota was short.
	fn paused_sessions(&self) -> Vec<PausedSession>;

	/// Resumes a session.
	fn resume(&self, request: &ResumeRequest) -> Result<(), ReviveError>;

	/// Drops an interrupted session that is too old to resume.
	fn discard_interrupted(&self, session_id: &str);
}

/// What a revival pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RevivalReport {
	/// Resumed sessions and how they qualified.
	pub resumed: Vec<(String, RevivalMode)>,
	/// Stale interrupted sessions discarded.
	pub discarded: Vec<String>,
	/// Sessions whose resume failed.
	pub failed: Vec<String>,
	/// Whether modes 1 and 2 were skipped because no key was usable.
	pub skipped_no_key: bool,
	/// Whether paused sessions triggered a probe of every key.
	pub probed_for_paused: bool,
}

impl<C, M> Rotator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Resumes up to `max_revivals` sessions.
	pub async fn revive_sessions(
		&self,
		ledger: &dyn SessionLedger,
		max_revivals: usize,
	) -> Result<RevivalReport> {
		self.revive_sessions_at(ledger, max_revivals, OffsetDateTime::now_utc()).await
	}

	/// [`Rotator::revive_sessions`] evaluated at `now`.
	pub async fn revive_sessions_at(
		&self,
		ledger: &dyn SessionLedger,
		max_revivals: usize,
		now: OffsetDateTime,
	) -> Result<RevivalReport> {
		const KIND: CycleKind = CycleKind::Revive;

		obs::record_cycle_outcome(KIND, CycleOutcome::Attempt);

		let span = CycleSpan::new(KIND, "revive_sessions");
		let result: Result<RevivalReport> = span
			.instrument(async move {
				let mut report = RevivalReport::default();
				let mut budget = max_revivals;
				let registry = self.store.read();
				let usable_key = select_active_key(&registry, &self.policy, now);

				if usable_key.is_some() {
					self.revive_interrupted(ledger, now, usable_key.as_ref(), &mut budget, &mut report);
					self.revive_dead_processes(ledger, usable_key.as_ref(), &mut budget, &mut report);
				} else {
					report.skipped_no_key = true;

					tracing::info!("No usable key; skipping interrupted and dead-process revival.");
				}

				let paused = ledger.paused_sessions();

				if budget > 0 && !paused.is_empty() {
					let recovered = self.probe_for_paused(now).await?;

					report.probed_for_paused = true;

					if let Some(key_id) = recovered {
						for session in paused {
							if budget == 0 {
								break;
							}

							let request = ResumeRequest {
								session_id: session.session_id,
								work_item: session.work_item,
								mode: RevivalMode::Paused,
								key_id: Some(key_id.clone()),
							};

							resume(ledger, request, &mut budget, &mut report);
						}
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

	fn revive_interrupted(
		&self,
		ledger: &dyn SessionLedger,
		now: OffsetDateTime,
		key_id: Option<&KeyId>,
		budget: &mut usize,
		report: &mut RevivalReport,
	) {
		for session in ledger.interrupted_sessions() {
			if now - session.interrupted_at > self.policy.revival_staleness {
				tracing::debug!(session = %session.session_id, "Discarded stale interrupted session.");
				ledger.discard_interrupted(&session.session_id);
				report.discarded.push(session.session_id);

				continue;
			}
			if *budget == 0 {
				continue;
			}

			let request = ResumeRequest {
				session_id: session.session_id,
				work_item: session.work_item,
				mode: RevivalMode::Interrupted,
				key_id: key_id.cloned(),
			};

			resume(ledger, request, budget, report);
		}
	}

	fn revive_dead_processes(
		&self,
		ledger: &dyn SessionLedger,
		key_id: Option<&KeyId>,
		budget: &mut usize,
		report: &mut RevivalReport,
	) {
		let mut seen: BTreeSet<String> =
			report.resumed.iter().map(|(session, _)| session.clone()).collect();

		for process in ledger.process_history() {
			if *budget == 0 {
				break;
			}
			if seen.contains(&process.session_id)
				|| ledger.process_alive(process.pid)
				|| !ledger.work_item_pending(&process.work_item)
			{
				continue;
			}

			seen.insert(process.session_id.clone());

			let request = ResumeRequest {
				session_id: process.session_id,
				work_item: Some(process.work_item),
				mode: RevivalMode::DeadProcess,
				key_id: key_id.cloned(),
			};

			resume(ledger, request, budget, report);
		}
	}

	/// Re-probes every key and returns one below the high-usage threshold, if any.
	async fn probe_for_paused(&self, now: OffsetDateTime) -> Result<Option<KeyId>> {
		let _cycle = self.cycle_guard.lock().await;
		let mut registry = self.store.read();
		let mut invalidated = Vec::new();

		self.probe_keys(&mut registry, now, &mut invalidated).await;
		self.store.write(&registry)?;

		let recovered = registry
			.keys
			.values()
			.filter(|record| record.status.is_selectable())
			.filter_map(|record| {
				record
					.fresh_usage(now, self.policy.health_max_age)
					.map(|usage| (record.key_id.clone(), usage.max_utilization()))
			})
			.filter(|(_, usage)| *usage < self.policy.high_usage_pct)
			.min_by(|a, b| a.1.total_cmp(&b.1))
			.map(|(key_id, _)| key_id);

		Ok(recovered)
	}
}

fn resume(
	ledger: &dyn SessionLedger,
	request: ResumeRequest,
	budget: &mut usize,
	report: &mut RevivalReport,
) {
	match ledger.resume(&request) {
		Ok(()) => {
			tracing::info!(session = %request.session_id, mode = ?request.mode, "Resumed session.");
			*budget -= 1;
			report.resumed.push((request.session_id, request.mode));
		},
		Err(e) => {
			tracing::warn!(session = %request.session_id, error = %e, "Failed to resume session.");
			report.failed.push(request.session_id);
		},
	}
}
