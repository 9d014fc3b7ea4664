//! Usage snapshots captured by health probes.

// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::{_prelude::*, error::TransientError};

/// Utilization observed for one key across the three tracked quota windows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
	/// Short (five hour) window utilization, 0-100.
	pub five_hour: f64,
	/// Instant the short window resets.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub five_hour_resets_at: Option<OffsetDateTime>,
	/// Long (seven day) window utilization, 0-100.
	pub seven_day: f64,
	/// Instant the long window resets.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub seven_day_resets_at: Option<OffsetDateTime>,
	/// Long window restricted to the secondary model class, 0-100.
	pub seven_day_sonnet: f64,
	/// Instant the restricted long window resets.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub seven_day_sonnet_resets_at: Option<OffsetDateTime>,
	/// Instant the snapshot was taken.
	#[serde(with = "time::serde::rfc3339")]
	pub checked_at: OffsetDateTime,
}
impl UsageSnapshot {
	/// Builds a snapshot with the three window utilizations and no reset instants.
	pub fn new(five_hour: f64, seven_day: f64, seven_day_sonnet: f64, checked_at: OffsetDateTime) -> Self {
		Self {
			five_hour,
			five_hour_resets_at: None,
			seven_day,
			seven_day_resets_at: None,
			seven_day_sonnet,
			seven_day_sonnet_resets_at: None,
			checked_at,
		}
	}

	/// Parses the usage endpoint payload.
	///
	/// Windows absent from the payload (or reported as `null`) count as zero utilization.
	pub fn from_response(
		value: serde_json::Value,
		checked_at: OffsetDateTime,
	) -> Result<Self, TransientError> {
		let response: UsageResponse = serde_path_to_error::deserialize(value)
			.map_err(|source| TransientError::ResponseParse { source, status: None })?;
		let (five_hour, five_hour_resets_at) = response.five_hour.unwrap_or_default().split();
		let (seven_day, seven_day_resets_at) = response.seven_day.unwrap_or_default().split();
		let (seven_day_sonnet, seven_day_sonnet_resets_at) =
			response.seven_day_sonnet.unwrap_or_default().split();

		Ok(Self {
			five_hour,
			five_hour_resets_at,
			seven_day,
			seven_day_resets_at,
			seven_day_sonnet,
			seven_day_sonnet_resets_at,
			checked_at,
		})
	}

	/// Highest utilization across all tracked windows.
	pub fn max_utilization(&self) -> f64 {
		self.five_hour.max(self.seven_day).max(self.seven_day_sonnet)
	}

	/// Returns `true` when any window sits at or above `threshold`.
	pub fn any_at_or_above(&self, threshold: f64) -> bool {
		self.max_utilization() >= threshold
	}

	/// Earliest reset instant among the windows at or above `threshold`.
	pub fn earliest_reset_above(&self, threshold: f64) -> Option<OffsetDateTime> {
		[
			(self.five_hour, self.five_hour_resets_at),
			(self.seven_day, self.seven_day_resets_at),
			(self.seven_day_sonnet, self.seven_day_sonnet_resets_at),
		]
		.into_iter()
		.filter(|(usage, _)| *usage >= threshold)
		.filter_map(|(_, reset)| reset)
		.min()
	}
}

#[derive(Debug, Default, Deserialize)]
struct UsageResponse {
	#[serde(default)]
	five_hour: Option<WindowPayload>,
	#[serde(default)]
	seven_day: Option<WindowPayload>,
	#[serde(default)]
	seven_day_sonnet: Option<WindowPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct WindowPayload {
	#[serde(default)]
	utilization: Option<f64>,
	#[serde(default)]
	resets_at: Option<String>,
}
impl WindowPayload {
	fn split(self) -> (f64, Option<OffsetDateTime>) {
		let utilization = self.utilization.filter(|value| value.is_finite()).unwrap_or(0.0);
		let resets_at =
			self.resets_at.and_then(|raw| OffsetDateTime::parse(raw.trim(), &Rfc3339).ok());

		(utilization, resets_at)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn parses_payload_with_missing_windows() {
		let now = macros::datetime!(2025-06-01 12:00 UTC);
		let payload = serde_json::json!({
			"five_hour": { "utilization": 42.5, "resets_at": "2025-06-01T15:00:00.000000+00:00" },
			"seven_day": null,
			"seven_day_opus": { "utilization": 99.0 },
		});
		let snapshot = UsageSnapshot::from_response(payload, now)
			.expect("Usage payload with sparse windows should parse.");

		assert_eq!(snapshot.five_hour, 42.5);
		assert_eq!(snapshot.five_hour_resets_at, Some(macros::datetime!(2025-06-01 15:00 UTC)));
		assert_eq!(snapshot.seven_day, 0.0);
		assert_eq!(snapshot.seven_day_sonnet, 0.0);
		assert_eq!(snapshot.checked_at, now);
		assert_eq!(snapshot.max_utilization(), 42.5);
	}

	#[test]
	fn rejects_non_numeric_utilization() {
		let payload = serde_json::json!({ "five_hour": { "utilization": "high" } });
		let err = UsageSnapshot::from_response(payload, OffsetDateTime::now_utc())
			.expect_err("String utilization should be rejected.");

		assert!(matches!(err, TransientError::ResponseParse { .. }));
	}

	#[test]
	fn earliest_reset_considers_only_saturated_windows() {
		let mut snapshot = UsageSnapshot::new(100.0, 40.0, 100.0, OffsetDateTime::now_utc());

		snapshot.five_hour_resets_at = Some(macros::datetime!(2025-06-01 18:00 UTC));
		snapshot.seven_day_resets_at = Some(macros::datetime!(2025-06-01 13:00 UTC));
		snapshot.seven_day_sonnet_resets_at = Some(macros::datetime!(2025-06-03 00:00 UTC));

		assert!(snapshot.any_at_or_above(100.0));
		assert_eq!(
			snapshot.earliest_reset_above(100.0),
			Some(macros::datetime!(2025-06-01 18:00 UTC))
		);
	}
}
