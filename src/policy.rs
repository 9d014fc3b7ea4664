//! Tunable rotation thresholds and their environment overrides.

// std
use std::env;
// self
use crate::{_prelude::*, error::ConfigError};

/// Environment variable overriding [`RotationPolicy::high_usage_pct`].
pub const ENV_HIGH_USAGE_PCT: &str = "QUOTA_ROTATOR_HIGH_USAGE_PCT";
/// Environment variable overriding [`RotationPolicy::exhausted_pct`].
pub const ENV_EXHAUSTED_PCT: &str = "QUOTA_ROTATOR_EXHAUSTED_PCT";
/// Environment variable overriding [`RotationPolicy::pre_expiry_buffer`] (seconds).
pub const ENV_PRE_EXPIRY_BUFFER_SECS: &str = "QUOTA_ROTATOR_PRE_EXPIRY_BUFFER_SECS";
/// Environment variable overriding [`RotationPolicy::health_max_age`] (seconds).
pub const ENV_HEALTH_MAX_AGE_SECS: &str = "QUOTA_ROTATOR_HEALTH_MAX_AGE_SECS";

/// Thresholds and timings that shape every rotation decision.
#[derive(Clone, Debug, PartialEq)]
pub struct RotationPolicy {
	/// Utilization (percent) at which a key counts as strained and rotation is considered.
	pub high_usage_pct: f64,
	/// Utilization (percent) at which a window counts as exhausted.
	pub exhausted_pct: f64,
	/// Tokens expiring within this buffer are refreshed, or rotated away from.
	pub pre_expiry_buffer: Duration,
	/// Usage snapshots older than this are treated as unknown.
	pub health_max_age: Duration,
	/// Minimum spacing between usage-triggered rotations.
	pub rotation_cooldown: Duration,
	/// Interrupted sessions older than this are discarded instead of revived.
	pub revival_staleness: Duration,
	/// Upper bound applied to every remote call.
	pub request_timeout: Duration,
}
impl RotationPolicy {
	/// Builds the default policy and applies overrides from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| env::var(name).ok())
	}

	/// Builds the default policy and applies overrides resolved through `lookup`.
	///
	/// Unset or blank variables keep their defaults; malformed values are rejected.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut policy = Self::default();
		let read = |name: &'static str| {
			lookup(name).map(|raw| raw.trim().to_owned()).filter(|raw| !raw.is_empty())
		};

		if let Some(raw) = read(ENV_HIGH_USAGE_PCT) {
			policy.high_usage_pct = parse_pct(ENV_HIGH_USAGE_PCT, raw)?;
		}
		if let Some(raw) = read(ENV_EXHAUSTED_PCT) {
			policy.exhausted_pct = parse_pct(ENV_EXHAUSTED_PCT, raw)?;
		}
		if let Some(raw) = read(ENV_PRE_EXPIRY_BUFFER_SECS) {
			policy.pre_expiry_buffer = parse_secs(ENV_PRE_EXPIRY_BUFFER_SECS, raw)?;
		}
		if let Some(raw) = read(ENV_HEALTH_MAX_AGE_SECS) {
			policy.health_max_age = parse_secs(ENV_HEALTH_MAX_AGE_SECS, raw)?;
		}

		if policy.high_usage_pct > policy.exhausted_pct {
			return Err(ConfigError::InvalidPolicy {
				name: ENV_HIGH_USAGE_PCT,
				value: policy.high_usage_pct.to_string(),
				reason: "must not exceed the exhausted threshold",
			});
		}

		Ok(policy)
	}

	/// Overrides the high-usage threshold.
	pub fn with_high_usage_pct(mut self, pct: f64) -> Self {
		self.high_usage_pct = pct;

		self
	}

	/// Overrides the exhausted threshold.
	pub fn with_exhausted_pct(mut self, pct: f64) -> Self {
		self.exhausted_pct = pct;

		self
	}

	/// Overrides the pre-expiry buffer.
	pub fn with_pre_expiry_buffer(mut self, buffer: Duration) -> Self {
		self.pre_expiry_buffer = buffer;

		self
	}

	/// Overrides the health-data staleness window.
	pub fn with_health_max_age(mut self, max_age: Duration) -> Self {
		self.health_max_age = max_age;

		self
	}

	/// Overrides the rotation cooldown.
	pub fn with_rotation_cooldown(mut self, cooldown: Duration) -> Self {
		self.rotation_cooldown = cooldown;

		self
	}

	/// Overrides the revival staleness window.
	pub fn with_revival_staleness(mut self, staleness: Duration) -> Self {
		self.revival_staleness = staleness;

		self
	}

	/// Overrides the remote call timeout.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}
}
impl Default for RotationPolicy {
	fn default() -> Self {
		Self {
			high_usage_pct: 90.0,
			exhausted_pct: 100.0,
			pre_expiry_buffer: Duration::minutes(10),
			health_max_age: Duration::minutes(15),
			rotation_cooldown: Duration::minutes(10),
			revival_staleness: Duration::minutes(30),
			request_timeout: Duration::seconds(5),
		}
	}
}

fn parse_pct(name: &'static str, raw: String) -> Result<f64, ConfigError> {
	match raw.parse::<f64>() {
		Ok(value) if value.is_finite() && (0.0..=100.0).contains(&value) => Ok(value),
		Ok(_) => Err(ConfigError::InvalidPolicy { name, value: raw, reason: "expected 0-100" }),
		Err(_) => Err(ConfigError::InvalidPolicy { name, value: raw, reason: "expected a number" }),
	}
}

fn parse_secs(name: &'static str, raw: String) -> Result<Duration, ConfigError> {
	match raw.parse::<i64>() {
		Ok(value) if value >= 0 => Ok(Duration::seconds(value)),
		_ => Err(ConfigError::InvalidPolicy {
			name,
			value: raw,
			reason: "expected a non-negative integer",
		}),
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::HashMap;
	// self
	use super::*;

	fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> =
			pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();

		move |name: &str| map.get(name).cloned()
	}

	#[test]
	fn unset_variables_keep_defaults() {
		let policy = RotationPolicy::from_lookup(lookup_from(&[(ENV_EXHAUSTED_PCT, "  ")]))
			.expect("Blank variables should be ignored.");

		assert_eq!(policy, RotationPolicy::default());
	}

	#[test]
	fn overrides_are_applied() {
		let policy = RotationPolicy::from_lookup(lookup_from(&[
			(ENV_HIGH_USAGE_PCT, "80"),
			(ENV_EXHAUSTED_PCT, "99.5"),
			(ENV_PRE_EXPIRY_BUFFER_SECS, "300"),
			(ENV_HEALTH_MAX_AGE_SECS, "60"),
		]))
		.expect("Valid overrides should be accepted.");

		assert_eq!(policy.high_usage_pct, 80.0);
		assert_eq!(policy.exhausted_pct, 99.5);
		assert_eq!(policy.pre_expiry_buffer, Duration::minutes(5));
		assert_eq!(policy.health_max_age, Duration::minutes(1));
	}

	#[test]
	fn malformed_values_are_rejected() {
		let err = RotationPolicy::from_lookup(lookup_from(&[(ENV_HIGH_USAGE_PCT, "lots")]))
			.expect_err("Non-numeric threshold must be rejected.");

		assert!(matches!(err, ConfigError::InvalidPolicy { name: ENV_HIGH_USAGE_PCT, .. }));

		let err = RotationPolicy::from_lookup(lookup_from(&[(ENV_PRE_EXPIRY_BUFFER_SECS, "-5")]))
			.expect_err("Negative buffer must be rejected.");

		assert!(matches!(err, ConfigError::InvalidPolicy { name: ENV_PRE_EXPIRY_BUFFER_SECS, .. }));

		let err = RotationPolicy::from_lookup(lookup_from(&[
			(ENV_HIGH_USAGE_PCT, "95"),
			(ENV_EXHAUSTED_PCT, "90"),
		]))
		.expect_err("High threshold above exhausted threshold must be rejected.");

		assert!(matches!(err, ConfigError::InvalidPolicy { .. }));
	}
}
