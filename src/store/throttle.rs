//! Monitor throttle state shared between monitor invocations.

// self
use crate::{_prelude::*, auth::KeyId};

/// Number of usage samples retained for velocity estimation.
pub const USAGE_HISTORY_LEN: usize = 6;

/// One utilization observation of the active key.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
	/// Highest window utilization at `at`.
	pub usage: f64,
	/// Observation instant.
	#[serde(with = "time::serde::rfc3339")]
	pub at: OffsetDateTime,
}

/// Rotation awaiting verification by the next monitor cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAudit {
	/// Key that was active before the rotation.
	#[serde(default)]
	pub from_key: Option<KeyId>,
	/// Key that became active.
	pub to_key: KeyId,
	/// When the rotation happened.
	#[serde(with = "time::serde::rfc3339")]
	pub rotated_at: OffsetDateTime,
	/// Why the rotation happened.
	pub reason: String,
}

/// Throttle document persisted next to the registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThrottleState {
	/// Last completed monitor probe.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub last_check: Option<OffsetDateTime>,
	/// Last usage-triggered rotation (drives the cooldown).
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub last_rotation: Option<OffsetDateTime>,
	/// Current poll interval in seconds.
	#[serde(default = "default_interval_secs")]
	pub current_interval: i64,
	/// Bounded usage history, oldest first.
	#[serde(default)]
	pub usage_history: VecDeque<UsageSample>,
	/// Rotation waiting to be audited.
	#[serde(default)]
	pub pending_audit: Option<PendingAudit>,
}
impl ThrottleState {
	/// Current interval as a [`Duration`].
	pub fn interval(&self) -> Duration {
		Duration::seconds(self.current_interval.max(0))
	}

	/// Returns `true` when the next monitor probe is due.
	pub fn due(&self, now: OffsetDateTime) -> bool {
		match self.last_check {
			Some(last) => now - last >= self.interval(),
			None => true,
		}
	}

	/// Appends a sample and drops the oldest beyond [`USAGE_HISTORY_LEN`].
	pub fn record_sample(&mut self, usage: f64, at: OffsetDateTime) {
		self.usage_history.push_back(UsageSample { usage, at });

		while self.usage_history.len() > USAGE_HISTORY_LEN {
			self.usage_history.pop_front();
		}
	}

	/// Forgets history gathered for a previous key.
	pub fn reset_history(&mut self) {
		self.usage_history.clear();
	}
}
impl Default for ThrottleState {
	fn default() -> Self {
		Self {
			last_check: None,
			last_rotation: None,
			current_interval: default_interval_secs(),
			usage_history: VecDeque::new(),
			pending_audit: None,
		}
	}
}

fn default_interval_secs() -> i64 {
	Duration::minutes(10).whole_seconds()
}
