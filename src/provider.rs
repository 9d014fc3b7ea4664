//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`) covering the usage, profile,
//! and token endpoints plus the public client identifier used for refreshes. `strategy` defines
//! [`ProviderStrategy`], an HTTP-client-agnostic hook used by flows to classify token-endpoint
//! failures into permanent and transient outcomes.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;
