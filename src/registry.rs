//! Persisted multi-key registry: key records, the active pointer, and the rotation log.

pub mod dedup;
pub mod select;

pub use dedup::*;
pub use select::*;

// self
use crate::{
	_prelude::*,
	auth::{KeyId, KeyRecord, KeyStatus, UsageSnapshot},
};

/// Schema version written to disk.
pub const REGISTRY_VERSION: u32 = 1;
/// Maximum number of rotation events retained (newest first).
pub const MAX_ROTATION_LOG: usize = 100;

/// Kinds of events appended to the rotation log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationEventKind {
	/// A key was discovered for the first time.
	KeyAdded,
	/// The active pointer moved to another key.
	KeySwitched,
	/// A key reached the exhausted threshold in some window.
	KeyExhausted,
	/// A key's access token was refreshed.
	KeyRefreshed,
	/// The provider permanently rejected a key's refresh token.
	RefreshTokenInvalid,
	/// A dead key was pruned.
	KeyRemoved,
	/// A duplicate key of the same account was merged away.
	KeyMerged,
	/// The last key of an account was pruned.
	AccountLost,
	/// No usable key remains.
	AllExhausted,
	/// A health probe recorded fresh usage.
	HealthCheck,
}
impl RotationEventKind {
	/// Returns the snake_case label used on disk and in logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			RotationEventKind::KeyAdded => "key_added",
			RotationEventKind::KeySwitched => "key_switched",
			RotationEventKind::KeyExhausted => "key_exhausted",
			RotationEventKind::KeyRefreshed => "key_refreshed",
			RotationEventKind::RefreshTokenInvalid => "refresh_token_invalid",
			RotationEventKind::KeyRemoved => "key_removed",
			RotationEventKind::KeyMerged => "key_merged",
			RotationEventKind::AccountLost => "account_lost",
			RotationEventKind::AllExhausted => "all_exhausted",
			RotationEventKind::HealthCheck => "health_check",
		}
	}
}
impl Display for RotationEventKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Single entry in the rotation log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotationEvent {
	/// When the event happened.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	/// Event kind.
	#[serde(rename = "event")]
	pub kind: RotationEventKind,
	/// Key the event refers to, if any.
	#[serde(default)]
	pub key_id: Option<KeyId>,
	/// Free-form reason (never contains secrets).
	#[serde(default)]
	pub reason: Option<String>,
	/// Usage snapshot captured with the event.
	#[serde(default)]
	pub usage: Option<UsageSnapshot>,
}
impl RotationEvent {
	/// Creates an event without key, reason, or usage attached.
	pub fn new(timestamp: OffsetDateTime, kind: RotationEventKind) -> Self {
		Self { timestamp, kind, key_id: None, reason: None, usage: None }
	}

	/// Attaches the key the event refers to.
	pub fn with_key(mut self, key_id: KeyId) -> Self {
		self.key_id = Some(key_id);

		self
	}

	/// Attaches a reason string.
	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());

		self
	}

	/// Attaches a usage snapshot.
	pub fn with_usage(mut self, usage: Option<UsageSnapshot>) -> Self {
		self.usage = usage;

		self
	}
}

/// Outcome of merging a discovered credential into the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
	/// The credential was new and got inserted.
	Added(KeyId),
	/// An existing record absorbed fresher token material.
	Updated(KeyId),
	/// The credential was already known and nothing changed.
	Unchanged(KeyId),
}
impl UpsertOutcome {
	/// Key the credential landed on.
	pub fn key_id(&self) -> &KeyId {
		match self {
			UpsertOutcome::Added(id) | UpsertOutcome::Updated(id) | UpsertOutcome::Unchanged(id) => id,
		}
	}
}

/// Shared rotation state persisted by a [`crate::store::RotationStore`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Registry {
	/// Schema version.
	#[serde(default = "default_version")]
	pub version: u32,
	/// Key currently handed to consumers.
	#[serde(default)]
	pub active_key_id: Option<KeyId>,
	/// All known keys, indexed by id.
	#[serde(default)]
	pub keys: BTreeMap<KeyId, KeyRecord>,
	/// Rotation events, newest first.
	#[serde(default)]
	pub rotation_log: Vec<RotationEvent>,
}
impl Registry {
	/// Returns the active record, if the pointer resolves.
	pub fn active(&self) -> Option<&KeyRecord> {
		self.active_key_id.as_ref().and_then(|id| self.keys.get(id))
	}

	/// Moves the active pointer and stamps `last_used_at` in the same mutation.
	///
	/// Returns `false` (and leaves the registry untouched) when `key_id` is unknown.
	pub fn activate(&mut self, key_id: &KeyId, now: OffsetDateTime) -> bool {
		let Some(record) = self.keys.get_mut(key_id) else {
			return false;
		};

		record.last_used_at = Some(now);
		self.active_key_id = Some(key_id.clone());

		true
	}

	/// Prepends an event and bounds the log to [`MAX_ROTATION_LOG`] entries.
	pub fn append_event(&mut self, event: RotationEvent) {
		self.rotation_log.insert(0, event);
		self.rotation_log.truncate(MAX_ROTATION_LOG);
	}

	/// Most recent event, if any.
	pub fn latest_event(&self) -> Option<&RotationEvent> {
		self.rotation_log.first()
	}

	/// Clears an active pointer that no longer references a record.
	///
	/// Returns `true` when a dangling pointer was cleared.
	pub fn repair(&mut self) -> bool {
		if self.active_key_id.as_ref().is_some_and(|id| !self.keys.contains_key(id)) {
			self.active_key_id = None;

			return true;
		}

		false
	}

	/// Finds the record a discovered credential belongs to.
	///
	/// A refreshed record keeps its original id while its access token changes, so lookups also
	/// match on the current access token and on the refresh token.
	pub fn find_matching(&self, incoming: &KeyRecord) -> Option<KeyId> {
		if self.keys.contains_key(&incoming.key_id) {
			return Some(incoming.key_id.clone());
		}

		self.keys
			.values()
			.find(|record| {
				record.access_token.expose() == incoming.access_token.expose()
					|| matches!(
						(&record.refresh_token, &incoming.refresh_token),
						(Some(known), Some(new)) if !new.is_blank() && known.expose() == new.expose()
					)
			})
			.map(|record| record.key_id.clone())
	}

	/// Merges a discovered credential, inserting it or refreshing the matching record.
	///
	/// Merging is idempotent: re-applying the same credential yields [`UpsertOutcome::Unchanged`].
	pub fn upsert(&mut self, incoming: KeyRecord, now: OffsetDateTime) -> UpsertOutcome {
		let Some(existing_id) = self.find_matching(&incoming) else {
			let key_id = incoming.key_id.clone();

			self.keys.insert(key_id.clone(), incoming);

			return UpsertOutcome::Added(key_id);
		};
		let Some(record) = self.keys.get_mut(&existing_id) else {
			return UpsertOutcome::Unchanged(existing_id);
		};
		let mut changed = false;
		let newer_expiry = match (incoming.expires_at, record.expires_at) {
			(Some(new), Some(old)) => new > old,
			(Some(_), None) => true,
			_ => false,
		};

		if record.access_token.expose() != incoming.access_token.expose() && newer_expiry {
			record.access_token = incoming.access_token;
			changed = true;
		}
		if let Some(refresh) = incoming.refresh_token.filter(|secret| !secret.is_blank()) {
			if record.refresh_token.as_ref().map(|known| known.expose()) != Some(refresh.expose()) {
				record.refresh_token = Some(refresh);
				changed = true;
			}
		}
		if newer_expiry {
			record.expires_at = incoming.expires_at;
			changed = true;
		}
		if incoming.source.is_some() && record.source != incoming.source {
			record.source = incoming.source;
			changed = true;
		}
		if record.status == KeyStatus::Expired && !record.is_expired_at(now) {
			record.status = KeyStatus::Active;
			changed = true;
		}

		if changed { UpsertOutcome::Updated(existing_id) } else { UpsertOutcome::Unchanged(existing_id) }
	}
}
impl Default for Registry {
	fn default() -> Self {
		Self {
			version: REGISTRY_VERSION,
			active_key_id: None,
			keys: BTreeMap::new(),
			rotation_log: Vec::new(),
		}
	}
}

fn default_version() -> u32 {
	REGISTRY_VERSION
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn record(token: &str) -> KeyRecord {
		KeyRecord::builder(token)
			.added_at(macros::datetime!(2025-01-01 00:00 UTC))
			.build()
			.expect("Registry test record should build.")
	}

	#[test]
	fn activate_stamps_last_used_and_rejects_unknown_ids() {
		let now = macros::datetime!(2025-01-01 12:00 UTC);
		let mut registry = Registry::default();
		let alpha = record("alpha");
		let alpha_id = alpha.key_id.clone();

		registry.keys.insert(alpha_id.clone(), alpha);

		assert!(!registry.activate(&KeyId::derive("missing"), now));
		assert!(registry.active_key_id.is_none());
		assert!(registry.activate(&alpha_id, now));
		assert_eq!(registry.active().and_then(|r| r.last_used_at), Some(now));
	}

	#[test]
	fn rotation_log_is_newest_first_and_bounded() {
		let start = macros::datetime!(2025-01-01 00:00 UTC);
		let mut registry = Registry::default();

		for minute in 0..(MAX_ROTATION_LOG as i64 + 5) {
			registry.append_event(RotationEvent::new(
				start + Duration::minutes(minute),
				RotationEventKind::HealthCheck,
			));
		}

		assert_eq!(registry.rotation_log.len(), MAX_ROTATION_LOG);
		assert_eq!(
			registry.latest_event().map(|event| event.timestamp),
			Some(start + Duration::minutes(MAX_ROTATION_LOG as i64 + 4))
		);
	}

	#[test]
	fn repair_clears_dangling_pointer() {
		let mut registry =
			Registry { active_key_id: Some(KeyId::derive("gone")), ..Registry::default() };

		assert!(registry.repair());
		assert!(registry.active_key_id.is_none());
		assert!(!registry.repair());
	}

	#[test]
	fn upsert_is_idempotent_and_follows_refreshed_tokens() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let mut registry = Registry::default();
		let original = KeyRecord::builder("access-1")
			.refresh_token("refresh-1")
			.expires_at(now + Duration::hours(1))
			.build()
			.expect("Original record should build.");
		let original_id = original.key_id.clone();

		assert_eq!(registry.upsert(original.clone(), now), UpsertOutcome::Added(original_id.clone()));
		assert_eq!(registry.upsert(original, now), UpsertOutcome::Unchanged(original_id.clone()));

		// A rotated token pair rediscovered from a source lands on the original record.
		if let Some(record) = registry.keys.get_mut(&original_id) {
			record.replace_tokens(
				crate::auth::TokenSecret::new("access-2"),
				Some(crate::auth::TokenSecret::new("refresh-2")),
				Some(now + Duration::hours(8)),
			);
		}

		let rediscovered = KeyRecord::builder("access-2")
			.refresh_token("refresh-2")
			.expires_at(now + Duration::hours(8))
			.build()
			.expect("Rediscovered record should build.");

		assert_eq!(registry.upsert(rediscovered, now), UpsertOutcome::Unchanged(original_id));
		assert_eq!(registry.keys.len(), 1);
	}

	#[test]
	fn upsert_revives_expired_record_with_fresh_expiry() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let mut registry = Registry::default();
		let mut stale = KeyRecord::builder("access")
			.expires_at(now - Duration::minutes(1))
			.build()
			.expect("Stale record should build.");

		stale.status = KeyStatus::Expired;
		registry.keys.insert(stale.key_id.clone(), stale);

		let fresh = KeyRecord::builder("access")
			.expires_at(now + Duration::hours(1))
			.source("env")
			.build()
			.expect("Fresh record should build.");
		let outcome = registry.upsert(fresh, now);

		assert!(matches!(outcome, UpsertOutcome::Updated(_)));
		assert_eq!(registry.keys.get(outcome.key_id()).map(|r| r.status), Some(KeyStatus::Active));
	}

	#[test]
	fn deserializes_sparse_documents() {
		let registry: Registry =
			serde_json::from_str("{}").expect("Empty object should deserialize to defaults.");

		assert_eq!(registry, Registry::default());
	}
}
