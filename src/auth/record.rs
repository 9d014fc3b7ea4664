//! Key records, lifecycle statuses, and builders.

// self
use crate::{
	_prelude::*,
	auth::{AccountId, KeyId, TokenSecret, UsageSnapshot},
};

/// Lifecycle status tracked for every key in the registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
	/// Usable; may be selected as the active key.
	#[default]
	Active,
	/// At least one usage window hit the exhausted threshold; waits for a reset.
	Exhausted,
	/// Access token expired and no refresh has succeeded yet.
	Expired,
	/// Refresh token permanently rejected; scheduled for pruning.
	Invalid,
	/// Retired entry kept only until the next prune.
	Tombstone,
}
impl KeyStatus {
	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			KeyStatus::Active => "active",
			KeyStatus::Exhausted => "exhausted",
			KeyStatus::Expired => "expired",
			KeyStatus::Invalid => "invalid",
			KeyStatus::Tombstone => "tombstone",
		}
	}

	/// Returns `true` for statuses the selection algorithm may consider.
	pub const fn is_selectable(self) -> bool {
		matches!(self, KeyStatus::Active | KeyStatus::Exhausted)
	}

	/// Returns `true` for statuses the pruner deletes when the key is not active.
	pub const fn is_dead(self) -> bool {
		matches!(self, KeyStatus::Invalid | KeyStatus::Tombstone)
	}
}
impl Display for KeyStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Errors produced by [`KeyRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum KeyRecordBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
}

/// One tracked credential plus its metadata and latest usage.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
	/// Identifier derived from the access token the key was discovered with.
	pub key_id: KeyId,
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if one is known.
	#[serde(default)]
	pub refresh_token: Option<TokenSecret>,
	/// Access token expiry, if known.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
	/// Owning account, resolved by a profile lookup.
	#[serde(default)]
	pub account_uuid: Option<AccountId>,
	/// Owning account e-mail, resolved by a profile lookup.
	#[serde(default)]
	pub account_email: Option<String>,
	/// Current lifecycle status.
	#[serde(default)]
	pub status: KeyStatus,
	/// Most recent health-probe snapshot.
	#[serde(default)]
	pub last_usage: Option<UsageSnapshot>,
	/// Instant the key was first discovered.
	#[serde(with = "time::serde::rfc3339")]
	pub added_at: OffsetDateTime,
	/// Instant the key was last made active.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub last_used_at: Option<OffsetDateTime>,
	/// Instant of the last successful health probe.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub last_health_check: Option<OffsetDateTime>,
	/// Label of the source that last supplied the token.
	#[serde(default)]
	pub source: Option<String>,
}
impl KeyRecord {
	/// Returns a builder seeded with the provided access token.
	pub fn builder(access_token: impl Into<String>) -> KeyRecordBuilder {
		KeyRecordBuilder::new(access_token)
	}

	/// Returns `true` when the access token expires at or before `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expiry| expiry <= instant)
	}

	/// Returns `true` when the token expires within `buffer` of `now` (or already has).
	pub fn expires_within(&self, now: OffsetDateTime, buffer: Duration) -> bool {
		self.expires_at.is_some_and(|expiry| expiry - now <= buffer)
	}

	/// Returns `true` when a refresh token is available.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.as_ref().is_some_and(|secret| !secret.is_blank())
	}

	/// Returns the latest usage if it was captured within `max_age` of `now`.
	pub fn fresh_usage(&self, now: OffsetDateTime, max_age: Duration) -> Option<&UsageSnapshot> {
		let checked = self.last_health_check?;

		if now - checked > max_age {
			return None;
		}

		self.last_usage.as_ref()
	}

	/// Replaces the token triple after a refresh or a newer discovery.
	pub fn replace_tokens(
		&mut self,
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
		expires_at: Option<OffsetDateTime>,
	) {
		self.access_token = access_token;

		if refresh_token.is_some() {
			self.refresh_token = refresh_token;
		}

		self.expires_at = expires_at;
	}

	/// Records a usage snapshot and derives the usage status from it.
	pub fn apply_usage(&mut self, usage: UsageSnapshot, exhausted_pct: f64) {
		self.last_health_check = Some(usage.checked_at);
		self.status = if usage.any_at_or_above(exhausted_pct) {
			KeyStatus::Exhausted
		} else {
			KeyStatus::Active
		};
		self.last_usage = Some(usage);
	}
}
impl Debug for KeyRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("KeyRecord")
			.field("key_id", &self.key_id)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("account_uuid", &self.account_uuid)
			.field("status", &self.status)
			.field("last_usage", &self.last_usage)
			.field("last_health_check", &self.last_health_check)
			.finish()
	}
}

/// Builder for [`KeyRecord`].
#[derive(Clone, Debug)]
pub struct KeyRecordBuilder {
	access_token: TokenSecret,
	refresh_token: Option<TokenSecret>,
	expires_at: Option<OffsetDateTime>,
	account_uuid: Option<AccountId>,
	account_email: Option<String>,
	status: KeyStatus,
	last_usage: Option<UsageSnapshot>,
	added_at: Option<OffsetDateTime>,
	source: Option<String>,
}
impl KeyRecordBuilder {
	fn new(access_token: impl Into<String>) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: None,
			expires_at: None,
			account_uuid: None,
			account_email: None,
			status: KeyStatus::Active,
			last_usage: None,
			added_at: None,
			source: None,
		}
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the optional expiry instant.
	pub fn maybe_expires_at(mut self, instant: Option<OffsetDateTime>) -> Self {
		self.expires_at = instant;

		self
	}

	/// Sets the owning account.
	pub fn account(mut self, uuid: AccountId, email: Option<String>) -> Self {
		self.account_uuid = Some(uuid);
		self.account_email = email;

		self
	}

	/// Overrides the initial status.
	pub fn status(mut self, status: KeyStatus) -> Self {
		self.status = status;

		self
	}

	/// Seeds a usage snapshot (and the matching health-check instant).
	pub fn usage(mut self, usage: UsageSnapshot) -> Self {
		self.last_usage = Some(usage);

		self
	}

	/// Sets the discovery instant.
	pub fn added_at(mut self, instant: OffsetDateTime) -> Self {
		self.added_at = Some(instant);

		self
	}

	/// Labels the source that supplied the token.
	pub fn source(mut self, label: impl Into<String>) -> Self {
		self.source = Some(label.into());

		self
	}

	/// Consumes the builder and produces a [`KeyRecord`].
	pub fn build(self) -> Result<KeyRecord, KeyRecordBuilderError> {
		if self.access_token.is_blank() {
			return Err(KeyRecordBuilderError::MissingAccessToken);
		}

		let last_health_check = self.last_usage.as_ref().map(|usage| usage.checked_at);

		Ok(KeyRecord {
			key_id: self.access_token.key_id(),
			access_token: self.access_token,
			refresh_token: self.refresh_token,
			expires_at: self.expires_at,
			account_uuid: self.account_uuid,
			account_email: self.account_email,
			status: self.status,
			last_usage: self.last_usage,
			added_at: self.added_at.unwrap_or_else(OffsetDateTime::now_utc),
			last_used_at: None,
			last_health_check,
			source: self.source,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn builder_derives_key_id_and_rejects_blank_tokens() {
		let record = KeyRecord::builder("sk-ant-oat01-alpha")
			.refresh_token("refresh-alpha")
			.expires_at(macros::datetime!(2025-01-01 01:00 UTC))
			.added_at(macros::datetime!(2025-01-01 00:00 UTC))
			.build()
			.expect("Key record builder should succeed.");

		assert_eq!(record.key_id, KeyId::derive("alpha"));
		assert!(record.can_refresh());
		assert_eq!(record.status, KeyStatus::Active);
		assert_eq!(
			KeyRecord::builder("   ").build().expect_err("Blank tokens must be rejected."),
			KeyRecordBuilderError::MissingAccessToken
		);
	}

	#[test]
	fn expiry_helpers_respect_buffer() {
		let record = KeyRecord::builder("token")
			.expires_at(macros::datetime!(2025-01-01 01:00 UTC))
			.build()
			.expect("Key record builder should succeed.");

		assert!(!record.is_expired_at(macros::datetime!(2025-01-01 00:59 UTC)));
		assert!(record.is_expired_at(macros::datetime!(2025-01-01 01:00 UTC)));
		assert!(record.expires_within(macros::datetime!(2025-01-01 00:50 UTC), Duration::minutes(10)));
		assert!(!record.expires_within(macros::datetime!(2025-01-01 00:49 UTC), Duration::minutes(10)));
	}

	#[test]
	fn stale_usage_is_treated_as_unknown() {
		let checked = macros::datetime!(2025-01-01 00:00 UTC);
		let record = KeyRecord::builder("token")
			.usage(UsageSnapshot::new(50.0, 10.0, 0.0, checked))
			.build()
			.expect("Key record builder should succeed.");

		assert!(record.fresh_usage(checked + Duration::minutes(5), Duration::minutes(15)).is_some());
		assert!(record.fresh_usage(checked + Duration::minutes(16), Duration::minutes(15)).is_none());
	}

	#[test]
	fn apply_usage_tracks_exhaustion() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let mut record = KeyRecord::builder("token").build().expect("Key record should build.");

		record.apply_usage(UsageSnapshot::new(100.0, 20.0, 0.0, now), 100.0);

		assert_eq!(record.status, KeyStatus::Exhausted);
		assert_eq!(record.last_health_check, Some(now));

		record.apply_usage(UsageSnapshot::new(3.0, 20.0, 0.0, now + Duration::hours(5)), 100.0);

		assert_eq!(record.status, KeyStatus::Active);
	}

	#[test]
	fn debug_redacts_secrets() {
		let record = KeyRecord::builder("very-secret")
			.refresh_token("also-secret")
			.build()
			.expect("Key record builder should succeed.");
		let rendered = format!("{record:?}");

		assert!(!rendered.contains("very-secret"));
		assert!(!rendered.contains("also-secret"));
	}
}
