//! Observability helpers for rotator cycles.
//!
//! Every cycle runs inside a `quota_rotator.cycle` span carrying the `cycle` and `stage` fields.
//! With the `metrics` feature enabled, [`record_cycle_outcome`] also increments the
//! `quota_rotator_cycle_total` counter labeled by `cycle` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Cycle kinds observed by the rotator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CycleKind {
	/// Full discovery/refresh/dedup/selection cycle.
	Sync,
	/// Lightweight active-key usage check.
	Monitor,
	/// Explicit rotation requested by a collaborator.
	Rotation,
	/// Session revival pass.
	Revive,
}
impl CycleKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CycleKind::Sync => "sync",
			CycleKind::Monitor => "monitor",
			CycleKind::Rotation => "rotation",
			CycleKind::Revive => "revive",
		}
	}
}
impl Display for CycleKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CycleOutcome {
	/// Entry to a cycle.
	Attempt,
	/// Cycle completed and persisted its state.
	Success,
	/// Cycle failed to persist its state.
	Failure,
}
impl CycleOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CycleOutcome::Attempt => "attempt",
			CycleOutcome::Success => "success",
			CycleOutcome::Failure => "failure",
		}
	}
}
impl Display for CycleOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
