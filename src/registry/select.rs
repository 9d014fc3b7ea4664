//! Pure key-selection functions over a [`Registry`] snapshot.

// self
use crate::{
	_prelude::*,
	auth::{KeyId, KeyRecord},
	policy::RotationPolicy,
	registry::Registry,
};

/// Selection view of one usable key.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
	/// Key identifier.
	pub key_id: KeyId,
	/// Highest window utilization, or `None` when unknown or stale.
	pub usage: Option<f64>,
}
impl Candidate {
	fn load(&self) -> f64 {
		self.usage.unwrap_or(0.0)
	}

	fn at_or_above(&self, threshold: f64) -> bool {
		self.usage.is_some_and(|usage| usage >= threshold)
	}
}

/// Chooses which key should be active.
///
/// Keys at or above `exhausted_pct` are never chosen. A current key at or above
/// `high_usage_pct` is only abandoned for a representative below that threshold. When every
/// usable key is high the current one is kept, so repeated calls never flap between keys.
pub fn select_active_key(
	registry: &Registry,
	policy: &RotationPolicy,
	now: OffsetDateTime,
) -> Option<KeyId> {
	let usable = usable_candidates(registry, policy, now);

	if usable.is_empty() {
		return None;
	}

	// An active sibling stands in for its account's representative.
	let active_group = registry.active().map(group_of);
	let current = active_group.as_ref().and_then(|group| {
		usable
			.iter()
			.find(|candidate| registry.keys.get(&candidate.key_id).map(group_of).as_ref() == Some(group))
	});
	let all_high = usable.iter().all(|candidate| candidate.at_or_above(policy.high_usage_pct));

	match current {
		Some(current) if all_high => Some(current.key_id.clone()),
		Some(current) if current.at_or_above(policy.high_usage_pct) =>
			lowest(usable.iter().filter(|c| !c.at_or_above(policy.high_usage_pct)))
				.or_else(|| Some(current.key_id.clone())),
		Some(current) => Some(current.key_id.clone()),
		None => lowest(usable.iter()),
	}
}

/// Lowest-usage usable key below `high_usage_pct`, outside the account of `exclude`.
pub fn best_alternative(
	registry: &Registry,
	policy: &RotationPolicy,
	now: OffsetDateTime,
	exclude: Option<&KeyId>,
) -> Option<KeyId> {
	let usable = usable_candidates(registry, policy, now);
	let excluded = exclude.map(|id| registry.keys.get(id).map_or_else(|| format!("key:{id}"), group_of));

	lowest(
		usable
			.iter()
			.filter(|candidate| {
				excluded.is_none()
					|| registry.keys.get(&candidate.key_id).map(group_of) != excluded
			})
			.filter(|candidate| !candidate.at_or_above(policy.high_usage_pct)),
	)
}

/// Usable representatives: one per account, live, and below the exhausted threshold.
pub fn usable_candidates(
	registry: &Registry,
	policy: &RotationPolicy,
	now: OffsetDateTime,
) -> Vec<Candidate> {
	let mut representatives: BTreeMap<String, &KeyRecord> = BTreeMap::new();

	for record in registry.keys.values().filter(|record| is_eligible(record, now)) {
		representatives
			.entry(group_of(record))
			.and_modify(|held| {
				if record.expires_at > held.expires_at {
					*held = record;
				}
			})
			.or_insert(record);
	}

	let mut candidates: Vec<Candidate> = representatives
		.into_values()
		.map(|record| Candidate {
			key_id: record.key_id.clone(),
			usage: record
				.fresh_usage(now, policy.health_max_age)
				.map(|usage| usage.max_utilization()),
		})
		.filter(|candidate| !candidate.at_or_above(policy.exhausted_pct))
		.collect();

	candidates.sort_by(|a, b| a.key_id.cmp(&b.key_id));

	candidates
}

/// Keys of one account share a group; unresolved keys stand alone.
fn group_of(record: &KeyRecord) -> String {
	match &record.account_uuid {
		Some(account) => format!("account:{account}"),
		None => format!("key:{}", record.key_id),
	}
}

fn is_eligible(record: &KeyRecord, now: OffsetDateTime) -> bool {
	record.status.is_selectable() && (!record.is_expired_at(now) || record.can_refresh())
}

fn lowest<'a>(candidates: impl Iterator<Item = &'a Candidate>) -> Option<KeyId> {
	candidates
		.min_by(|a, b| a.load().total_cmp(&b.load()).then_with(|| a.key_id.cmp(&b.key_id)))
		.map(|candidate| candidate.key_id.clone())
}
