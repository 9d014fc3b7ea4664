//! File-backed [`RotationStore`] shared by every process on the host.

// std
use std::{
	fs::{self, File},
	io::Write,
	process,
	sync::atomic::{AtomicU64, Ordering},
};
// self
use crate::{
	_prelude::*,
	registry::Registry,
	store::{RotationStore, StoreError, ThrottleState},
};

const DEFAULT_DIR: &str = ".claude";
const DEFAULT_FILE: &str = "api-key-rotation.json";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Persists the registry and throttle state as pretty JSON documents.
///
/// Every write goes through a uniquely named temp file that is synced and renamed over the
/// target, so readers only ever observe complete documents.
#[derive(Debug)]
pub struct FileStore {
	path: PathBuf,
	throttle_path: PathBuf,
	legacy_path: Option<PathBuf>,
	preserved: Mutex<BTreeSet<PathBuf>>,
}
impl FileStore {
	/// Opens a store rooted at `path`; the throttle document lives next to it.
	pub fn open(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let throttle_path = sibling(&path, "-throttle.json");

		Self { path, throttle_path, legacy_path: None, preserved: Mutex::default() }
	}

	/// Opens the store at [`FileStore::default_path`].
	pub fn open_default() -> Result<Self, StoreError> {
		Ok(Self::open(Self::default_path()?))
	}

	/// Canonical registry location under the user's home directory.
	pub fn default_path() -> Result<PathBuf, StoreError> {
		dirs::home_dir()
			.map(|home| home.join(DEFAULT_DIR).join(DEFAULT_FILE))
			.ok_or_else(|| StoreError::Backend { message: "Home directory is unknown".into() })
	}

	/// Overrides the throttle document location.
	pub fn with_throttle_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.throttle_path = path.into();

		self
	}

	/// Merges a legacy registry copy on read and retires it after the next successful write.
	pub fn with_legacy(mut self, path: impl Into<PathBuf>) -> Self {
		self.legacy_path = Some(path.into());

		self
	}

	/// Registry path.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Throttle document path.
	pub fn throttle_path(&self) -> &Path {
		&self.throttle_path
	}

	fn load<T>(&self, path: &Path) -> Option<T>
	where
		T: for<'de> Deserialize<'de>,
	{
		let bytes = match fs::read(path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
			Err(e) => {
				tracing::warn!(path = %path.display(), error = %e, "Failed to read state file.");

				return None;
			},
		};

		if bytes.iter().all(u8::is_ascii_whitespace) {
			return None;
		}

		match serde_json::from_slice(&bytes) {
			Ok(value) => Some(value),
			Err(e) => {
				tracing::warn!(path = %path.display(), error = %e, "State file is corrupt.");
				self.preserve_corrupt(path, &bytes);

				None
			},
		}
	}

	fn preserve_corrupt(&self, path: &Path, bytes: &[u8]) {
		let mut preserved = self.preserved.lock();

		if preserved.contains(path) {
			return;
		}

		let unix = OffsetDateTime::now_utc().unix_timestamp();
		let target = sibling(path, &format!(".corrupt-{unix}"));

		match fs::write(&target, bytes) {
			Ok(()) => {
				tracing::warn!(copy = %target.display(), "Preserved corrupt state file.");
				preserved.insert(path.to_path_buf());
			},
			Err(e) => tracing::warn!(copy = %target.display(), error = %e, "Failed to preserve corrupt state file."),
		}
	}

	fn merge_legacy(&self, registry: &mut Registry) {
		let Some(legacy_path) = &self.legacy_path else {
			return;
		};
		let Some(legacy) = self.load::<Registry>(legacy_path) else {
			return;
		};

		for (id, record) in legacy.keys {
			match registry.keys.get(&id) {
				Some(current) if current.last_health_check >= record.last_health_check => {},
				_ => {
					registry.keys.insert(id, record);
				},
			}
		}

		if registry.active_key_id.is_none() {
			registry.active_key_id = legacy.active_key_id;
		}
		if registry.rotation_log.is_empty() {
			registry.rotation_log = legacy.rotation_log;
		}

		registry.repair();
	}

	fn retire_legacy(&self) {
		let Some(legacy_path) = &self.legacy_path else {
			return;
		};

		if !legacy_path.exists() {
			return;
		}

		let target = sibling(legacy_path, ".migrated");

		match fs::rename(legacy_path, &target) {
			Ok(()) => tracing::info!(legacy = %legacy_path.display(), "Migrated legacy registry."),
			Err(e) => tracing::warn!(legacy = %legacy_path.display(), error = %e, "Failed to retire legacy registry."),
		}
	}
}
impl RotationStore for FileStore {
	fn read(&self) -> Registry {
		let mut registry = self.load::<Registry>(&self.path).unwrap_or_default();

		self.merge_legacy(&mut registry);

		registry
	}

	fn write(&self, registry: &Registry) -> Result<(), StoreError> {
		let mut repaired = registry.clone();

		repaired.repair();
		write_atomic(&self.path, &repaired)?;
		self.retire_legacy();

		Ok(())
	}

	fn read_throttle(&self) -> ThrottleState {
		self.load(&self.throttle_path).unwrap_or_default()
	}

	fn write_throttle(&self, state: &ThrottleState) -> Result<(), StoreError> {
		write_atomic(&self.throttle_path, state)
	}
}

/// Serializes `value` to `path` via a synced temp file and an atomic rename.
pub(crate) fn write_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
	T: ?Sized + Serialize,
{
	let serialized = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization {
		message: format!("Failed to serialize {}: {e}", path.display()),
	})?;

	write_bytes_atomic(path, &serialized)
}

/// Writes raw bytes to `path` via a synced temp file and an atomic rename.
pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
	ensure_parent_exists(path)?;

	let tmp_path = sibling(
		path,
		&format!(
			".{}.{}.{}.tmp",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
			TMP_SEQ.fetch_add(1, Ordering::Relaxed),
		),
	);

	{
		let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
			message: format!("Failed to create {}: {e}", tmp_path.display()),
		})?;

		file.write_all(bytes).map_err(|e| StoreError::Backend {
			message: format!("Failed to write {}: {e}", tmp_path.display()),
		})?;
		file.sync_all().map_err(|e| StoreError::Backend {
			message: format!("Failed to sync {}: {e}", tmp_path.display()),
		})?;
	}

	fs::rename(&tmp_path, path).map_err(|e| {
		let _ = fs::remove_file(&tmp_path);

		StoreError::Backend { message: format!("Failed to replace {}: {e}", path.display()) }
	})
}

fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", parent.display()),
		})?;
	}

	Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
	let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();

	if suffix.starts_with('-') {
		// `-throttle.json` replaces the extension of `api-key-rotation.json`.
		if let Some(stem) = path.file_stem() {
			name = stem.to_os_string();
		}
	}

	name.push(suffix);

	path.with_file_name(name)
}
