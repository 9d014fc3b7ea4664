//! Key identifiers, redacted secrets, key records, and usage snapshots.

pub mod id;
pub mod record;
pub mod secret;
pub mod usage;

pub use id::*;
pub use record::*;
pub use secret::*;
pub use usage::*;
