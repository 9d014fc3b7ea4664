// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for probe, refresh, and rotation outcomes.
#[derive(Debug, Default)]
pub struct RotatorMetrics {
	probes: AtomicU64,
	probe_failures: AtomicU64,
	refresh_attempts: AtomicU64,
	refresh_successes: AtomicU64,
	refresh_failures: AtomicU64,
	rotations: AtomicU64,
}
impl RotatorMetrics {
	/// Returns the total number of usage probes.
	pub fn probes(&self) -> u64 {
		self.probes.load(Ordering::Relaxed)
	}

	/// Returns the number of probes that did not yield usage.
	pub fn probe_failures(&self) -> u64 {
		self.probe_failures.load(Ordering::Relaxed)
	}

	/// Returns the total number of refresh attempts.
	pub fn refresh_attempts(&self) -> u64 {
		self.refresh_attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of successful refreshes.
	pub fn refresh_successes(&self) -> u64 {
		self.refresh_successes.load(Ordering::Relaxed)
	}

	/// Returns the number of failed refreshes (transient or permanent).
	pub fn refresh_failures(&self) -> u64 {
		self.refresh_failures.load(Ordering::Relaxed)
	}

	/// Returns the number of times the active key changed.
	pub fn rotations(&self) -> u64 {
		self.rotations.load(Ordering::Relaxed)
	}

	pub(crate) fn record_probe(&self, ok: bool) {
		self.probes.fetch_add(1, Ordering::Relaxed);

		if !ok {
			self.probe_failures.fetch_add(1, Ordering::Relaxed);
		}
	}

	pub(crate) fn record_refresh_attempt(&self) {
		self.refresh_attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_refresh_success(&self) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_refresh_failure(&self) {
		self.refresh_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_rotation(&self) {
		self.rotations.fetch_add(1, Ordering::Relaxed);
	}
}
