#![cfg(feature = "reqwest")]

// std
use std::{fs, thread};
// crates.io
use time::macros;
// self
use quota_rotator::{
	_preludet::*,
	auth::{KeyRecord, UsageSnapshot},
	flows::Rotator,
	oauth::ReqwestTransportErrorMapper,
	policy::RotationPolicy,
	registry::{Registry, RotationEventKind},
	store::{FileStore, RotationStore},
};

fn shared_rotator(path: &Path) -> ReqwestTestRotator {
	let store: Arc<dyn RotationStore> = Arc::new(FileStore::open(path));

	Rotator::with_http_client(
		store,
		test_descriptor("http://127.0.0.1:9"),
		RotationPolicy::default(),
		test_reqwest_http_client(),
		Arc::new(ReqwestTransportErrorMapper),
	)
}

fn seeded_registry(now: OffsetDateTime) -> Registry {
	let mut registry = Registry::default();

	for (token, usage) in [("shared-a", 30.0), ("shared-b", 10.0)] {
		let record = KeyRecord::builder(token)
			.expires_at(now + Duration::hours(6))
			.usage(UsageSnapshot::new(usage, 1.0, 0.0, now))
			.build()
			.expect("Shared fixture should build.");

		registry.keys.insert(record.key_id.clone(), record);
	}

	registry
}

#[tokio::test]
async fn rotators_sharing_a_file_see_each_others_rotations() {
	let dir = temp_path("shared_store");
	let path = dir.join("api-key-rotation.json");
	let now = OffsetDateTime::now_utc();
	let mut registry = seeded_registry(now);
	let first_id = registry
		.keys
		.values()
		.find(|record| record.access_token.expose() == "shared-a")
		.map(|record| record.key_id.clone())
		.expect("Seeded key should exist.");

	registry.activate(&first_id, now);
	FileStore::open(&path).write(&registry).expect("Seeding the file store should succeed.");

	let writer = shared_rotator(&path);
	let reader = shared_rotator(&path);

	assert_eq!(reader.active_credential().map(|credential| credential.key_id), Some(first_id.clone()));

	let target = writer
		.request_rotation_at("manual", now)
		.await
		.expect("Requested rotation should succeed.")
		.expect("An alternative key should exist.");
	let seen = reader.active_credential().expect("Reader should see an active key.");

	assert_ne!(target, first_id);
	assert_eq!(seen.key_id, target);
	assert_eq!(seen.access_token.expose(), "shared-b");

	let switched = FileStore::open(&path)
		.read()
		.latest_event()
		.map(|event| (event.kind, event.reason.clone()))
		.expect("Rotation should be logged.");

	assert_eq!(switched.0, RotationEventKind::KeySwitched);
	assert!(switched.1.is_some_and(|reason| reason.starts_with("requested:manual")));
	assert!(
		FileStore::open(&path).read_throttle().last_rotation.is_none(),
		"Requested rotations must not start the cooldown."
	);

	let _ = fs::remove_dir_all(dir);
}

#[test]
fn concurrent_writers_never_leave_a_torn_document() {
	let dir = temp_path("torn_store");
	let path = dir.join("api-key-rotation.json");
	let now = OffsetDateTime::now_utc();
	let handles: Vec<_> = (0..8)
		.map(|_| {
			let path = path.clone();

			thread::spawn(move || {
				let store = FileStore::open(&path);

				for _ in 0..20 {
					store.write(&seeded_registry(now)).expect("Concurrent write should succeed.");

					let read = store.read();

					assert!(read.keys.is_empty() || read.keys.len() == 2);
				}
			})
		})
		.collect();

	for handle in handles {
		handle.join().expect("Writer thread should not panic.");
	}

	let raw = fs::read_to_string(&path).expect("Final document should be readable.");

	serde_json::from_str::<serde_json::Value>(&raw).expect("Final document should be valid JSON.");

	assert_eq!(FileStore::open(&path).read().keys.len(), 2);

	let leftovers = fs::read_dir(&dir)
		.expect("Store directory should be listable.")
		.filter_map(|entry| entry.ok())
		.filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
		.count();

	assert_eq!(leftovers, 0);

	let _ = fs::remove_dir_all(dir);
}

#[test]
fn arbitrary_usage_fractions_survive_a_write_read_cycle() {
	let dir = temp_path("float_store");
	let path = dir.join("api-key-rotation.json");
	let now = macros::datetime!(2025-06-01 08:30:15 UTC);
	let mut state = 0x9E37_79B9_7F4A_7C15_u64;
	let mut next = move || {
		state ^= state << 13;
		state ^= state >> 7;
		state ^= state << 17;

		(state >> 11) as f64 / (1_u64 << 53) as f64 * 100.0
	};
	let mut usages = vec![
		0.027239818540084178,
		0.032453990417884444,
		0.09425614271242308,
		0.09937315108136135,
	];

	usages.extend((0..400).map(|_| next()));

	let mut registry = Registry::default();

	for (idx, chunk) in usages.chunks(3).enumerate() {
		let [five_hour, seven_day, sonnet] = [0, 1, 2].map(|i| chunk.get(i).copied().unwrap_or(0.0));
		let record = KeyRecord::builder(format!("float-{idx}"))
			.expires_at(now + Duration::hours(6))
			.added_at(now)
			.usage(UsageSnapshot::new(five_hour, seven_day, sonnet, now))
			.build()
			.expect("Float fixture should build.");

		registry.keys.insert(record.key_id.clone(), record);
	}

	let store = FileStore::open(&path);

	store.write(&registry).expect("Writing the float registry should succeed.");

	assert_eq!(store.read(), registry);

	let _ = fs::remove_dir_all(dir);
}
