#![cfg(feature = "reqwest")]

// self
use quota_rotator::{
	_preludet::*,
	auth::{KeyRecord, TokenSecret},
	error::{ConfigError, Error, TransientError, TransportError},
	flows::{RefreshOutcome, Rotator},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	oauth::{
		TransportErrorMapper,
		oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse},
	},
	policy::RotationPolicy,
	provider::EndpointKind,
	store::{MemoryStore, RotationStore},
};

#[derive(Debug)]
enum FakeTransportError {
	Throttled,
}
impl Display for FakeTransportError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Throttled => write!(f, "Transport throttled."),
		}
	}
}
impl StdError for FakeTransportError {}

#[derive(Clone, Copy)]
struct FakeHttpClient {
	retry_after: Duration,
}
impl FakeHttpClient {
	fn throttled(retry_after: Duration) -> Self {
		Self { retry_after }
	}
}
impl TokenHttpClient for FakeHttpClient {
	type Handle = FakeHttpHandle;
	type TransportError = FakeTransportError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		FakeHttpHandle { slot, retry_after: self.retry_after }
	}
}

struct FakeHttpHandle {
	slot: ResponseMetadataSlot,
	retry_after: Duration,
}
impl<'a> AsyncHttpClient<'a> for FakeHttpHandle {
	type Error = HttpClientError<FakeTransportError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'a + Send + Sync>>;

	fn call(&'a self, _request: HttpRequest) -> Self::Future {
		let slot = self.slot.clone();
		let retry_after = self.retry_after;

		Box::pin(async move {
			assert!(
				slot.take().is_none(),
				"ResponseMetadataSlot must be clear before dispatching a request."
			);
			slot.store(ResponseMetadata { status: Some(429), retry_after: Some(retry_after) });

			Err(HttpClientError::Reqwest(Box::new(FakeTransportError::Throttled)))
		})
	}
}

#[derive(Clone, Default)]
struct RecordingTransportErrorMapper {
	calls: Arc<Mutex<Vec<(EndpointKind, Option<ResponseMetadata>)>>>,
}
impl RecordingTransportErrorMapper {
	fn recorded(&self) -> Vec<(EndpointKind, Option<ResponseMetadata>)> {
		self.calls.lock().clone()
	}
}
impl TransportErrorMapper<FakeTransportError> for RecordingTransportErrorMapper {
	fn map_transport_error(
		&self,
		endpoint: EndpointKind,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<FakeTransportError>,
	) -> Error {
		let status = meta.and_then(|value| value.status);
		let retry_after = meta.and_then(|value| value.retry_after);

		self.calls.lock().push((endpoint, meta.cloned()));

		match err {
			HttpClientError::Reqwest(inner) => TransientError::Endpoint {
				message: format!("Fake transport error on {endpoint}: {inner}"),
				status,
				retry_after,
			}
			.into(),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			other => TransientError::Endpoint {
				message: format!("Unhandled HTTP client error variant: {other:?}"),
				status,
				retry_after,
			}
			.into(),
		}
	}
}

fn build_rotator(
	mapper: Arc<RecordingTransportErrorMapper>,
) -> Rotator<FakeHttpClient, RecordingTransportErrorMapper> {
	let store: Arc<dyn RotationStore> = Arc::new(MemoryStore::default());

	Rotator::with_http_client(
		store,
		test_descriptor("https://mock.example.com"),
		RotationPolicy::default(),
		Arc::new(FakeHttpClient::throttled(Duration::seconds(5))),
		mapper,
	)
}

#[tokio::test]
async fn fake_transport_failures_surface_in_probe_results() {
	let mapper = Arc::new(RecordingTransportErrorMapper::default());
	let rotator = build_rotator(mapper.clone());
	let result = rotator.probe(&TokenSecret::new("throttled-token")).await;

	assert!(!result.valid);
	assert!(
		result.error.as_deref().is_some_and(|error| error.contains("Fake transport error on usage")),
		"Unexpected probe error: {:?}.",
		result.error
	);

	let recorded = mapper.recorded();

	assert_eq!(recorded.len(), 1);
	assert_eq!(recorded[0].0, EndpointKind::Usage);
	assert_eq!(recorded[0].1.as_ref().and_then(|meta| meta.status), Some(429));
	assert!(rotator.fetch_profile(&TokenSecret::new("throttled-token")).await.is_none());
	assert_eq!(mapper.recorded()[1].0, EndpointKind::Profile);
}

#[tokio::test]
async fn fake_transport_failures_make_refresh_transient() {
	let mapper = Arc::new(RecordingTransportErrorMapper::default());
	let rotator = build_rotator(mapper.clone());
	let record = KeyRecord::builder("access-throttled")
		.refresh_token("refresh-throttled")
		.build()
		.expect("Refresh fixture should build.");

	match rotator.refresh_key(&record).await {
		RefreshOutcome::Transient(message) => assert!(message.contains("Fake transport error on token")),
		other => panic!("Unexpected refresh outcome: {other:?}."),
	}

	let recorded = mapper.recorded();

	assert_eq!(recorded.len(), 1);
	assert_eq!(recorded[0].0, EndpointKind::Token);
	assert_eq!(recorded[0].1.as_ref().and_then(|meta| meta.retry_after), Some(Duration::seconds(5)));
}
