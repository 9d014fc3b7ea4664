#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
use time::macros;
// self
use quota_rotator::{
	_preludet::*,
	auth::{KeyRecord, UsageSnapshot},
	flows::{RefreshOutcome, SyncOptions, apply_refresh_outcome},
	registry::{Registry, RotationEventKind},
	store::RotationStore,
};

fn refreshable(access: &str, refresh: &str, expires_in: Duration) -> KeyRecord {
	KeyRecord::builder(access)
		.refresh_token(refresh)
		.expires_at(OffsetDateTime::now_utc() + expires_in)
		.build()
		.expect("Refresh fixture should build.")
}

#[tokio::test]
async fn refresh_rotates_tokens_and_updates_registry() {
	let server = MockServer::start_async().await;
	let (rotator, _) = build_reqwest_test_rotator(test_descriptor(&server.base_url()));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/v1/oauth/token")
				.header("content-type", "application/x-www-form-urlencoded");
			then.status(200).header("content-type", "application/json").body(
				r#"{"access_token":"access-next","refresh_token":"refresh-next","token_type":"bearer","expires_in":28800}"#,
			);
		})
		.await;
	let record = refreshable("access-old", "refresh-old", Duration::minutes(2));
	let old_id = record.key_id.clone();
	let outcome = rotator.refresh_key(&record).await;

	mock.assert_async().await;

	let RefreshOutcome::Refreshed(tokens) = &outcome else {
		panic!("Refresh should succeed, got {outcome:?}.");
	};

	assert_eq!(tokens.access_token.expose(), "access-next");
	assert_eq!(tokens.refresh_token.as_ref().map(|t| t.expose()), Some("refresh-next"));
	assert!(tokens.expires_at.is_some_and(|at| at > OffsetDateTime::now_utc() + Duration::hours(7)));

	let mut registry = Registry::default();

	registry.keys.insert(old_id.clone(), record);

	assert!(apply_refresh_outcome(&mut registry, &old_id, &outcome, OffsetDateTime::now_utc()));

	let updated = registry.keys.get(&old_id).expect("Refreshed key should stay under its id.");

	assert_eq!(updated.access_token.expose(), "access-next");
	assert_eq!(updated.refresh_token.as_ref().map(|t| t.expose()), Some("refresh-next"));
	assert_eq!(
		registry.latest_event().map(|event| event.kind),
		Some(RotationEventKind::KeyRefreshed)
	);
	assert_eq!(rotator.metrics.refresh_successes(), 1);
}

#[tokio::test]
async fn refreshed_expiry_counts_from_the_cycle_clock() {
	let server = MockServer::start_async().await;
	let (rotator, _) = build_reqwest_test_rotator(test_descriptor(&server.base_url()));

	server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				r#"{"access_token":"access-clock","token_type":"bearer","expires_in":3600}"#,
			);
		})
		.await;

	let now = macros::datetime!(2030-02-03 04:05:06 UTC);
	let record = refreshable("access-stale", "refresh-clock", Duration::minutes(1));
	let RefreshOutcome::Refreshed(tokens) = rotator.refresh_key_at(&record, now).await else {
		panic!("Refresh should succeed.");
	};

	assert_eq!(tokens.expires_at, Some(macros::datetime!(2030-02-03 05:05:06 UTC)));
	assert!(tokens.refresh_token.is_none());
}

#[tokio::test]
async fn invalid_grant_is_permanent_and_server_errors_are_transient() {
	let server = MockServer::start_async().await;
	let (rotator, _) = build_reqwest_test_rotator(test_descriptor(&server.base_url()));
	let mut mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/oauth/token");
			then.status(400).header("content-type", "application/json").body(
				r#"{"error":"invalid_grant","error_description":"Refresh token revoked"}"#,
			);
		})
		.await;
	let record = refreshable("access-dead", "refresh-dead", Duration::minutes(1));

	assert!(matches!(rotator.refresh_key(&record).await, RefreshOutcome::InvalidGrant { .. }));

	mock.delete_async().await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/oauth/token");
			then.status(503).header("content-type", "application/json").body(
				r#"{"error":"temporarily_unavailable"}"#,
			);
		})
		.await;

	assert!(matches!(rotator.refresh_key(&record).await, RefreshOutcome::Transient(_)));
	assert_eq!(rotator.metrics.refresh_failures(), 2);
}

#[tokio::test]
async fn missing_refresh_token_never_calls_the_provider() {
	let server = MockServer::start_async().await;
	let (rotator, _) = build_reqwest_test_rotator(test_descriptor(&server.base_url()));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/oauth/token");
			then.status(500);
		})
		.await;
	let record = KeyRecord::builder("access-only").build().expect("Fixture should build.");

	assert_eq!(
		rotator.refresh_key(&record).await,
		RefreshOutcome::Transient("missing refresh token".into())
	);

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn sync_invalidates_and_prunes_a_revoked_key() {
	let server = MockServer::start_async().await;
	let (rotator, store) = build_reqwest_test_rotator(test_descriptor(&server.base_url()));
	let now = OffsetDateTime::now_utc();
	let revoked = refreshable("access-revoked", "refresh-revoked", Duration::minutes(3));
	let healthy = KeyRecord::builder("access-healthy")
		.expires_at(now + Duration::hours(6))
		.usage(UsageSnapshot::new(12.0, 4.0, 0.0, now))
		.build()
		.expect("Healthy fixture should build.");
	let revoked_id = revoked.key_id.clone();
	let healthy_id = healthy.key_id.clone();
	let mut registry = Registry::default();

	registry.keys.insert(revoked_id.clone(), revoked);
	registry.keys.insert(healthy_id.clone(), healthy);
	registry.active_key_id = Some(healthy_id.clone());
	store.write(&registry).expect("Seeding the store should succeed.");
	server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/oauth/token");
			then.status(400).header("content-type", "application/json").body(r#"{"error":"invalid_grant"}"#);
		})
		.await;

	let report = rotator
		.sync_at(SyncOptions::default().with_probe(false).with_install(false), now)
		.await
		.expect("Sync should succeed.");
	let stored = store.read();

	assert_eq!(report.pruned, vec![revoked_id.clone()]);
	assert!(!stored.keys.contains_key(&revoked_id));
	assert_eq!(stored.active_key_id, Some(healthy_id));
	assert!(stored.rotation_log.iter().any(|event| {
		event.kind == RotationEventKind::RefreshTokenInvalid && event.key_id.as_ref() == Some(&revoked_id)
	}));
	assert!(
		stored.rotation_log.iter().all(|event| event.kind != RotationEventKind::KeySwitched),
		"Pruning a non-active key must not move the active pointer."
	);
}
