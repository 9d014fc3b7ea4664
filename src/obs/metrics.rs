// self
use crate::obs::{CycleKind, CycleOutcome};

/// Records a cycle outcome via the global metrics recorder (when enabled).
pub fn record_cycle_outcome(kind: CycleKind, outcome: CycleOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"quota_rotator_cycle_total",
			"cycle" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}
