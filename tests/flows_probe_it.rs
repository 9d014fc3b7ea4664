#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use quota_rotator::{
	_preludet::*,
	auth::TokenSecret,
	flows::{PROBE_INVALID_RESPONSE, PROBE_UNAUTHORIZED},
	provider::OAUTH_BETA,
};

#[tokio::test]
async fn probe_parses_usage_and_sends_oauth_headers() {
	let server = MockServer::start_async().await;
	let (rotator, _) = build_reqwest_test_rotator(test_descriptor(&server.base_url()));
	let mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/api/oauth/usage")
				.header("authorization", "Bearer probe-token")
				.header("anthropic-beta", OAUTH_BETA);
			then.status(200).header("content-type", "application/json").body(
				r#"{"five_hour":{"utilization":42.0,"resets_at":"2025-06-01T15:00:00+00:00"},"seven_day":{"utilization":61.5},"seven_day_sonnet":null}"#,
			);
		})
		.await;
	let result = rotator.probe(&TokenSecret::new("probe-token")).await;

	mock.assert_async().await;

	assert!(result.valid);
	assert!(result.error.is_none());

	let usage = result.usage.expect("Valid probe should carry usage.");

	assert_eq!(usage.five_hour, 42.0);
	assert_eq!(usage.seven_day, 61.5);
	assert_eq!(usage.max_utilization(), 61.5);
	assert!(result.raw.is_some());
	assert_eq!(rotator.metrics.probes(), 1);
}

#[tokio::test]
async fn probe_labels_unauthorized_and_server_failures() {
	let server = MockServer::start_async().await;
	let (rotator, _) = build_reqwest_test_rotator(test_descriptor(&server.base_url()));

	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/oauth/usage").header("authorization", "Bearer revoked");
			then.status(401).body(r#"{"error":{"type":"authentication_error"}}"#);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/oauth/usage").header("authorization", "Bearer flaky");
			then.status(500).body("upstream unavailable");
		})
		.await;

	let revoked = rotator.probe(&TokenSecret::new("revoked")).await;

	assert!(!revoked.valid);
	assert!(revoked.is_unauthorized());
	assert_eq!(revoked.error.as_deref(), Some(PROBE_UNAUTHORIZED));

	let flaky = rotator.probe(&TokenSecret::new("flaky")).await;

	assert!(!flaky.valid);
	assert!(!flaky.is_unauthorized());
	assert_eq!(flaky.error.as_deref(), Some("http_500"));
	assert!(flaky.usage.is_none());
	assert_eq!(rotator.metrics.probe_failures(), 2);
}

#[tokio::test]
async fn probe_rejects_non_json_bodies() {
	let server = MockServer::start_async().await;
	let (rotator, _) = build_reqwest_test_rotator(test_descriptor(&server.base_url()));

	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/oauth/usage");
			then.status(200).header("content-type", "text/html").body("<html>maintenance</html>");
		})
		.await;

	let result = rotator.probe(&TokenSecret::new("html")).await;

	assert!(!result.valid);
	assert_eq!(result.error.as_deref(), Some(PROBE_INVALID_RESPONSE));
	assert!(result.raw.is_none());
}

#[tokio::test]
async fn probe_reports_transport_failures_without_erroring() {
	let (rotator, _) = build_reqwest_test_rotator(test_descriptor("http://127.0.0.1:9"));
	let result = rotator.probe(&TokenSecret::new("offline")).await;

	assert!(!result.valid);
	assert!(result.error.is_some());
	assert!(!result.is_unauthorized());
}
