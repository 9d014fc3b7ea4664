//! Account-level deduplication and dead-key pruning.

// std
use std::cmp::Ordering;
// self
use crate::{
	_prelude::*,
	auth::{AccountId, KeyId, KeyRecord},
	registry::{Registry, RotationEvent, RotationEventKind},
};

/// Summary of a [`dedupe`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DedupReport {
	/// `(removed, survivor)` pairs, one per merged record.
	pub merged: Vec<(KeyId, KeyId)>,
	/// Whether the active pointer was redirected to a survivor.
	pub active_redirected: bool,
}
impl DedupReport {
	/// Returns `true` when the pass changed nothing.
	pub fn is_empty(&self) -> bool {
		self.merged.is_empty()
	}
}

/// Collapses records sharing an `account_uuid` into a single survivor.
///
/// The survivor is the record with the greatest `expires_at`, whatever its status; ties go to the smallest key
/// id. The freshest usage observed across the group is carried onto the survivor.
pub fn dedupe(registry: &mut Registry, now: OffsetDateTime) -> DedupReport {
	let mut groups: BTreeMap<AccountId, Vec<KeyId>> = BTreeMap::new();
	let mut report = DedupReport::default();

	for record in registry.keys.values() {
		if let Some(account) = &record.account_uuid {
			groups.entry(account.clone()).or_default().push(record.key_id.clone());
		}
	}

	for (account, ids) in groups.into_iter().filter(|(_, ids)| ids.len() > 1) {
		let members: Vec<&KeyRecord> = ids.iter().filter_map(|id| registry.keys.get(id)).collect();
		let Some(survivor) = members.iter().copied().max_by(|a, b| survivor_order(a, b)) else {
			continue;
		};
		let survivor_id = survivor.key_id.clone();
		let freshest = members
			.iter()
			.copied()
			.filter(|record| record.last_health_check.is_some())
			.max_by_key(|record| record.last_health_check)
			.filter(|record| record.key_id != survivor_id)
			.filter(|record| record.last_health_check > survivor.last_health_check)
			.map(|record| (record.last_usage.clone(), record.last_health_check));

		if let (Some((usage, checked)), Some(target)) = (freshest, registry.keys.get_mut(&survivor_id))
		{
			target.last_usage = usage;
			target.last_health_check = checked;
		}

		for id in ids.into_iter().filter(|id| *id != survivor_id) {
			registry.keys.remove(&id);

			if registry.active_key_id.as_ref() == Some(&id) {
				registry.active_key_id = Some(survivor_id.clone());
				report.active_redirected = true;
			}

			tracing::info!(
				account = %account.short(),
				removed = %id.short(),
				survivor = %survivor_id.short(),
				"Merged duplicate key."
			);
			registry.append_event(
				RotationEvent::new(now, RotationEventKind::KeyMerged)
					.with_key(id.clone())
					.with_reason(format!("merged_into:{}", survivor_id.short())),
			);
			report.merged.push((id, survivor_id.clone()));
		}
	}

	report
}

/// Removes every dead (`invalid`/`tombstone`) record that is not active.
///
/// When the last record of an account disappears, a single `account_lost` event is logged for it.
pub fn prune(registry: &mut Registry, now: OffsetDateTime) -> Vec<KeyId> {
	let doomed: Vec<KeyId> = registry
		.keys
		.values()
		.filter(|record| record.status.is_dead())
		.filter(|record| registry.active_key_id.as_ref() != Some(&record.key_id))
		.map(|record| record.key_id.clone())
		.collect();
	let mut reported: BTreeSet<AccountId> = BTreeSet::new();

	for id in &doomed {
		let Some(record) = registry.keys.remove(id) else {
			continue;
		};

		if let Some(account) = record.account_uuid {
			let orphaned = !registry
				.keys
				.values()
				.any(|other| other.account_uuid.as_ref() == Some(&account) && !doomed.contains(&other.key_id));

			if orphaned && reported.insert(account.clone()) {
				tracing::warn!(account = %account.short(), "Lost the last key of an account.");
				registry.append_event(
					RotationEvent::new(now, RotationEventKind::AccountLost)
						.with_key(id.clone())
						.with_reason(format!(
							"account:{}",
							record.account_email.as_deref().unwrap_or(account.as_ref())
						)),
				);
			}
		}

		tracing::info!(key = %id.short(), status = %record.status, "Pruned dead key.");
		registry.append_event(
			RotationEvent::new(now, RotationEventKind::KeyRemoved)
				.with_key(id.clone())
				.with_reason(record.status.as_str()),
		);
	}

	doomed
}

fn survivor_order(a: &KeyRecord, b: &KeyRecord) -> Ordering {
	a.expires_at
		.cmp(&b.expires_at)
		// Smaller id wins ties, so it must compare as "greater".
		.then_with(|| b.key_id.cmp(&a.key_id))
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::auth::{KeyStatus, UsageSnapshot};

	const NOW: OffsetDateTime = macros::datetime!(2025-03-01 12:00 UTC);

	fn account(id: &str) -> AccountId {
		AccountId::new(id).expect("Account fixture should be valid.")
	}

	fn keyed(token: &str, acct: Option<&str>, expires_in_hours: i64) -> KeyRecord {
		let mut builder = KeyRecord::builder(token)
			.expires_at(NOW + Duration::hours(expires_in_hours))
			.added_at(NOW - Duration::days(1));

		if let Some(acct) = acct {
			builder = builder.account(account(acct), Some(format!("{acct}@example.com")));
		}

		builder.build().expect("Dedup fixture should build.")
	}

	fn registry_of(records: Vec<KeyRecord>) -> Registry {
		let mut registry = Registry::default();

		for record in records {
			registry.keys.insert(record.key_id.clone(), record);
		}

		registry
	}

	#[test]
	fn keeps_latest_expiry_and_redirects_active_pointer() {
		let older = keyed("older", Some("acct-a"), 1);
		let newer = keyed("newer", Some("acct-a"), 8);
		let loner = keyed("loner", None, 2);
		let (older_id, newer_id) = (older.key_id.clone(), newer.key_id.clone());
		let mut registry = registry_of(vec![older, newer, loner]);

		registry.active_key_id = Some(older_id.clone());

		let report = dedupe(&mut registry, NOW);

		assert_eq!(report.merged, vec![(older_id, newer_id.clone())]);
		assert!(report.active_redirected);
		assert_eq!(registry.keys.len(), 2);
		assert_eq!(registry.active_key_id, Some(newer_id));
		assert_eq!(registry.latest_event().map(|e| e.kind), Some(RotationEventKind::KeyMerged));

		let accounts: Vec<_> =
			registry.keys.values().filter_map(|record| record.account_uuid.clone()).collect();

		assert_eq!(accounts.len(), 1);
	}

	#[test]
	fn ties_break_on_smallest_key_id_and_carry_fresh_usage() {
		let mut first = keyed("tie-one", Some("acct-b"), 4);
		let second = keyed("tie-two", Some("acct-b"), 4);
		let expected = first.key_id.clone().min(second.key_id.clone());

		first.apply_usage(UsageSnapshot::new(55.0, 5.0, 0.0, NOW - Duration::minutes(1)), 100.0);

		let mut registry = registry_of(vec![first, second]);

		dedupe(&mut registry, NOW);

		let survivor = registry.keys.get(&expected).expect("Smallest key id should survive the tie.");

		assert_eq!(survivor.last_health_check, Some(NOW - Duration::minutes(1)));
		assert_eq!(survivor.last_usage.as_ref().map(|u| u.five_hour), Some(55.0));
	}

	#[test]
	fn latest_expiry_survives_regardless_of_status() {
		let mut revoked = keyed("revoked-late", Some("acct-g"), 8);
		let live = keyed("live-early", Some("acct-g"), 1);
		let (revoked_id, live_id) = (revoked.key_id.clone(), live.key_id.clone());

		revoked.status = KeyStatus::Invalid;

		let mut registry = registry_of(vec![revoked, live]);
		let report = dedupe(&mut registry, NOW);

		assert_eq!(report.merged, vec![(live_id, revoked_id.clone())]);
		assert_eq!(registry.keys.keys().collect::<Vec<_>>(), vec![&revoked_id]);
	}

	#[test]
	fn dedupe_is_idempotent() {
		let mut registry =
			registry_of(vec![keyed("x1", Some("acct-c"), 1), keyed("x2", Some("acct-c"), 2)]);

		dedupe(&mut registry, NOW);

		let snapshot = registry.clone();

		assert!(dedupe(&mut registry, NOW).is_empty());
		assert_eq!(registry, snapshot);
	}

	#[test]
	fn prune_removes_dead_keys_and_reports_lost_accounts_once() {
		let mut dead_a = keyed("dead-a", Some("acct-d"), 1);
		let mut dead_b = keyed("dead-b", Some("acct-d"), 2);
		let mut dead_active = keyed("dead-active", None, 2);
		let live = keyed("live", Some("acct-e"), 3);

		dead_a.status = KeyStatus::Invalid;
		dead_b.status = KeyStatus::Tombstone;
		dead_active.status = KeyStatus::Invalid;

		let active_id = dead_active.key_id.clone();
		let mut registry = registry_of(vec![dead_a, dead_b, dead_active, live]);

		registry.active_key_id = Some(active_id.clone());

		let removed = prune(&mut registry, NOW);

		assert_eq!(removed.len(), 2);
		assert!(registry.keys.contains_key(&active_id));
		assert_eq!(
			registry.rotation_log.iter().filter(|e| e.kind == RotationEventKind::AccountLost).count(),
			1
		);
		assert_eq!(
			registry.rotation_log.iter().filter(|e| e.kind == RotationEventKind::KeyRemoved).count(),
			2
		);
	}

	#[test]
	fn prune_keeps_account_alive_when_a_sibling_survives() {
		let mut dead = keyed("dead", Some("acct-f"), 1);
		let sibling = keyed("sibling", Some("acct-f"), 2);

		dead.status = KeyStatus::Invalid;

		let mut registry = registry_of(vec![dead, sibling]);

		prune(&mut registry, NOW);

		assert!(registry.rotation_log.iter().all(|e| e.kind != RotationEventKind::AccountLost));
	}
}
