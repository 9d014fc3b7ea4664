//! Storage contracts and built-in store implementations for the shared rotation state.

pub mod file;
pub mod memory;
pub mod throttle;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use throttle::*;

// self
use crate::{_prelude::*, registry::Registry};

/// Storage backend contract implemented by rotation stores.
///
/// Reads never fail: an absent or unreadable document yields the default state. Writes replace
/// the whole document atomically, so concurrent writers resolve as last-writer-wins.
pub trait RotationStore
where
	Self: Send + Sync,
{
	/// Loads the current registry.
	fn read(&self) -> Registry;

	/// Atomically replaces the registry.
	fn write(&self, registry: &Registry) -> Result<(), StoreError>;

	/// Loads the monitor throttle state.
	fn read_throttle(&self) -> ThrottleState;

	/// Atomically replaces the monitor throttle state.
	fn write_throttle(&self, state: &ThrottleState) -> Result<(), StoreError>;
}

/// Error type produced by [`RotationStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
