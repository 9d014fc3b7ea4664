//! Adaptive poll intervals, usage velocity, and predictive rotation decisions.

// self
use crate::{
	_prelude::*,
	policy::RotationPolicy,
	store::{ThrottleState, UsageSample},
};

/// Poll interval for the active key at `usage` percent.
pub fn poll_interval(usage: f64) -> Duration {
	match usage {
		u if u < 50.0 => Duration::minutes(10),
		u if u < 70.0 => Duration::minutes(5),
		u if u < 85.0 => Duration::minutes(2),
		_ => Duration::minutes(1),
	}
}

/// Usage growth in percentage points per minute between the oldest and newest samples.
pub fn velocity<'a>(history: impl IntoIterator<Item = &'a UsageSample>) -> f64 {
	let mut iter = history.into_iter();
	let Some(first) = iter.next() else {
		return 0.0;
	};
	let Some(last) = iter.last() else {
		return 0.0;
	};
	let minutes = (last.at - first.at).as_seconds_f64() / 60.0;

	if minutes <= 0.0 {
		return 0.0;
	}

	(last.usage - first.usage) / minutes
}

/// Whether the key is projected to hit 100% before the check after next.
///
/// Fires iff `velocity > 0` and the minutes left at that velocity are strictly below
/// `1.5 × interval`.
pub fn should_rotate_predictively(current: f64, velocity: f64, interval: Duration) -> bool {
	if velocity <= 0.0 {
		return false;
	}

	let minutes_left = (100.0 - current) / velocity;
	let horizon = 1.5 * interval.as_seconds_f64() / 60.0;

	minutes_left < horizon
}

/// Whether a recent usage-triggered rotation still suppresses new ones.
pub fn cooldown_active(state: &ThrottleState, policy: &RotationPolicy, now: OffsetDateTime) -> bool {
	state.last_rotation.is_some_and(|last| now - last < policy.rotation_cooldown)
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	const T0: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

	fn sample(usage: f64, minutes: i64) -> UsageSample {
		UsageSample { usage, at: T0 + Duration::minutes(minutes) }
	}

	#[test]
	fn interval_steps() {
		assert_eq!(poll_interval(0.0), Duration::minutes(10));
		assert_eq!(poll_interval(49.9), Duration::minutes(10));
		assert_eq!(poll_interval(50.0), Duration::minutes(5));
		assert_eq!(poll_interval(70.0), Duration::minutes(2));
		assert_eq!(poll_interval(85.0), Duration::minutes(1));
		assert_eq!(poll_interval(100.0), Duration::minutes(1));
	}

	#[test]
	fn velocity_uses_oldest_and_newest_samples() {
		assert_eq!(velocity(std::iter::empty()), 0.0);
		assert_eq!(velocity(&[sample(10.0, 0)]), 0.0);
		assert_eq!(velocity(&[sample(10.0, 0), sample(99.0, 1), sample(30.0, 10)]), 2.0);
		assert_eq!(velocity(&[sample(10.0, 5), sample(30.0, 5)]), 0.0);
	}

	#[test]
	fn predictive_boundary_is_strict() {
		let v = velocity(&[sample(50.0, 0), sample(70.0, 5)]);

		// 4 %/min leaves 7.5 minutes at 70%, exactly 1.5 × 5 minutes.
		assert_eq!(v, 4.0);
		assert!(!should_rotate_predictively(70.0, v, Duration::minutes(5)));
		assert!(should_rotate_predictively(71.0, v, Duration::minutes(5)));
		assert!(!should_rotate_predictively(99.0, 0.0, Duration::minutes(1)));
		assert!(!should_rotate_predictively(99.0, -3.0, Duration::minutes(1)));
	}

	#[test]
	fn cooldown_window() {
		let policy = RotationPolicy::default();
		let mut state = ThrottleState::default();

		assert!(!cooldown_active(&state, &policy, T0));

		state.last_rotation = Some(T0);

		assert!(cooldown_active(&state, &policy, T0 + Duration::minutes(9)));
		assert!(!cooldown_active(&state, &policy, T0 + Duration::minutes(10)));
	}
}
