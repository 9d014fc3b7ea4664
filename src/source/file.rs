//! Credential-file source and sink (`~/.claude/.credentials.json`).

// std
use std::fs;
// self
use crate::{
	_prelude::*,
	auth::KeyRecord,
	source::{CredentialSink, CredentialSource, OauthDocument, SourceCredential, SourceError, parse_document},
	store::file::write_bytes_atomic,
};

/// Reads the consumer credential file and installs the active key into it.
#[derive(Clone, Debug)]
pub struct CredentialFileSource {
	path: PathBuf,
	label: String,
}
impl CredentialFileSource {
	/// Uses the credential file at `path`.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let label = format!("file:{}", path.display());

		Self { path, label }
	}

	/// Default location under the user's home directory.
	pub fn default_path() -> Option<PathBuf> {
		dirs::home_dir().map(|home| home.join(".claude").join(".credentials.json"))
	}

	/// Credential file path.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn read_raw(&self) -> Result<Option<String>, SourceError> {
		match fs::read_to_string(&self.path) {
			Ok(raw) => Ok(Some(raw)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(SourceError::Unavailable { label: self.label.clone(), message: e.to_string() }),
		}
	}
}
impl CredentialSource for CredentialFileSource {
	fn label(&self) -> &str {
		&self.label
	}

	fn read(&self) -> Result<Option<SourceCredential>, SourceError> {
		match self.read_raw()? {
			Some(raw) => parse_document(&self.label, &raw),
			None => Ok(None),
		}
	}
}
impl CredentialSink for CredentialFileSource {
	fn install(&self, record: &KeyRecord) -> Result<(), SourceError> {
		let malformed =
			|message: String| SourceError::Malformed { label: self.label.clone(), message };
		let mut root = match self.read_raw()? {
			Some(raw) if !raw.trim().is_empty() =>
				serde_json::from_str::<serde_json::Value>(&raw).map_err(|e| malformed(e.to_string()))?,
			_ => serde_json::json!({}),
		};
		let Some(object) = root.as_object_mut() else {
			return Err(malformed("credential file root is not an object".into()));
		};
		let section = object
			.entry(OauthDocument::FIELD)
			.or_insert_with(|| serde_json::json!({}));
		let update =
			serde_json::to_value(OauthDocument::from_record(record)).map_err(|e| malformed(e.to_string()))?;

		let serde_json::Value::Object(fields) = update else {
			return Err(malformed("credential document did not serialize to an object".into()));
		};

		match section.as_object_mut() {
			Some(existing) => {
				existing.remove("expiresAt");
				existing.remove("refreshToken");
				existing.extend(fields);
			},
			None => *section = serde_json::Value::Object(fields),
		}

		let bytes = serde_json::to_vec_pretty(&root).map_err(|e| malformed(e.to_string()))?;

		write_bytes_atomic(&self.path, &bytes).map_err(|e| SourceError::Unavailable {
			label: self.label.clone(),
			message: e.to_string(),
		})?;
		tracing::info!(key = %record.key_id.short(), path = %self.path.display(), "Installed active credential.");

		Ok(())
	}

	fn installed(&self) -> Option<SourceCredential> {
		self.read().ok().flatten()
	}
}
