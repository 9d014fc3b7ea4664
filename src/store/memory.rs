//! Thread-safe in-memory [`RotationStore`] implementation for embedding and tests.

// self
use crate::{
	_prelude::*,
	registry::Registry,
	store::{RotationStore, StoreError, ThrottleState},
};

/// Storage backend that keeps the rotation state in-process.
#[derive(Debug, Default)]
pub struct MemoryStore {
	registry: RwLock<Registry>,
	throttle: RwLock<ThrottleState>,
}
impl MemoryStore {
	/// Replaces the throttle state in place.
	pub fn seed_throttle(&self, state: ThrottleState) {
		*self.throttle.write() = state;
	}
}
impl RotationStore for MemoryStore {
	fn read(&self) -> Registry {
		self.registry.read().clone()
	}

	fn write(&self, registry: &Registry) -> Result<(), StoreError> {
		let mut repaired = registry.clone();

		repaired.repair();
		*self.registry.write() = repaired;

		Ok(())
	}

	fn read_throttle(&self) -> ThrottleState {
		self.throttle.read().clone()
	}

	fn write_throttle(&self, state: &ThrottleState) -> Result<(), StoreError> {
		*self.throttle.write() = state.clone();

		Ok(())
	}
}
