//! Runs one sync cycle against a mocked provider, a credential file, and a file-backed registry.

// std
use std::{env, fs, process, sync::Arc};
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use url::Url;
// self
use quota_rotator::{
	flows::{Rotator, SyncOptions},
	http::ReqwestHttpClient,
	oauth::ReqwestTransportErrorMapper,
	policy::RotationPolicy,
	provider::ProviderDescriptor,
	reqwest::Client,
	source::{CredentialFileSource, CredentialSource},
	store::{FileStore, RotationStore},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let usage_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/oauth/usage").header("authorization", "Bearer demo-access");
			then.status(200).header("content-type", "application/json").body(
				"{\"five_hour\":{\"utilization\":42.0},\"seven_day\":{\"utilization\":12.0}}",
			);
		})
		.await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/oauth/profile");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"account\":{\"uuid\":\"demo-account\",\"email\":\"demo@example.com\"}}");
		})
		.await;

	let dir = env::temp_dir().join(format!("quota_rotator_demo_{}", process::id()));

	fs::create_dir_all(&dir)?;

	let credentials = dir.join(".credentials.json");

	fs::write(&credentials, "{\"claudeAiOauth\":{\"accessToken\":\"demo-access\"}}")?;

	let descriptor = ProviderDescriptor::builder("demo-client")
		.usage_endpoint(Url::parse(&server.url("/api/oauth/usage"))?)
		.profile_endpoint(Url::parse(&server.url("/api/oauth/profile"))?)
		.token_endpoint(Url::parse(&server.url("/v1/oauth/token"))?)
		.build()?;
	let store: Arc<dyn RotationStore> = Arc::new(FileStore::open(dir.join("api-key-rotation.json")));
	let file_source = Arc::new(CredentialFileSource::new(&credentials));
	let sources: Vec<Arc<dyn CredentialSource>> = vec![file_source.clone()];
	let http_client = ReqwestHttpClient::with_client(Client::builder().build()?);
	let rotator = <Rotator<ReqwestHttpClient, ReqwestTransportErrorMapper>>::with_http_client(
		store,
		descriptor,
		RotationPolicy::from_env()?,
		http_client,
		Arc::new(ReqwestTransportErrorMapper),
	)
	.with_sources(sources)
	.with_sink(file_source);
	let report = rotator.sync(SyncOptions::default()).await?;

	println!(
		"Discovered {} credential(s), probed {}, active key: {}.",
		report.discovered,
		report.probed,
		report.active.as_ref().map_or("none", |id| id.short()),
	);

	if let Some(active) = rotator.active_credential() {
		println!("Account: {}.", active.account_email.as_deref().unwrap_or("unresolved"));
	}

	usage_mock.assert_async().await;
	fs::remove_dir_all(dir)?;

	Ok(())
}
