//! Credential sources: where keys are discovered and where the active key gets installed.

pub mod env;
pub mod file;
#[cfg(feature = "keychain")] pub mod keychain;

pub use env::EnvSource;
pub use file::CredentialFileSource;
#[cfg(feature = "keychain")] pub use keychain::KeychainSource;

// self
use crate::{
	_prelude::*,
	auth::{KeyId, KeyRecord, KeyRecordBuilderError},
};

/// Errors raised while reading from or writing to a credential source.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum SourceError {
	/// The backing store could not be reached or read.
	#[error("Credential source `{label}` is unavailable: {message}.")]
	Unavailable {
		/// Source label.
		label: String,
		/// Human-readable failure.
		message: String,
	},
	/// The backing store holds a document the source cannot interpret.
	#[error("Credential source `{label}` is malformed: {message}.")]
	Malformed {
		/// Source label.
		label: String,
		/// Human-readable failure.
		message: String,
	},
}

/// Credential as read from a source, before it is merged into the registry.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceCredential {
	/// Access token material.
	pub access_token: String,
	/// Refresh token material, if the source stores one.
	pub refresh_token: Option<String>,
	/// Access token expiry, if known.
	pub expires_at: Option<OffsetDateTime>,
	/// Label of the source that produced the credential.
	pub source_label: String,
}
impl SourceCredential {
	/// Identity of the credential.
	pub fn key_id(&self) -> KeyId {
		KeyId::derive(&self.access_token)
	}

	/// Whether the credential is expired at `now` and cannot be refreshed.
	pub fn is_dead_at(&self, now: OffsetDateTime) -> bool {
		let expired = self.expires_at.is_some_and(|expiry| expiry <= now);
		let refreshable = self.refresh_token.as_deref().is_some_and(|token| !token.trim().is_empty());

		expired && !refreshable
	}

	/// Converts the credential into a new registry record.
	pub fn into_record(self, now: OffsetDateTime) -> Result<KeyRecord, KeyRecordBuilderError> {
		let mut builder = KeyRecord::builder(self.access_token)
			.maybe_expires_at(self.expires_at)
			.added_at(now)
			.source(self.source_label);

		if let Some(refresh) = self.refresh_token.filter(|token| !token.trim().is_empty()) {
			builder = builder.refresh_token(refresh);
		}

		builder.build()
	}
}
impl Debug for SourceCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SourceCredential")
			.field("key_id", &self.key_id())
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("source_label", &self.source_label)
			.finish()
	}
}

/// A place credentials can be discovered from.
pub trait CredentialSource
where
	Self: Send + Sync,
{
	/// Stable label used in logs and on discovered records.
	fn label(&self) -> &str;

	/// Reads the credential currently held by the source, if any.
	fn read(&self) -> Result<Option<SourceCredential>, SourceError>;
}

/// A place the active credential is published to for consumers.
pub trait CredentialSink
where
	Self: Send + Sync,
{
	/// Writes `record`'s tokens so consumers pick them up.
	fn install(&self, record: &KeyRecord) -> Result<(), SourceError>;

	/// Reads back the credential consumers currently see.
	fn installed(&self) -> Option<SourceCredential>;

	/// Whether consumers currently see `record`'s access token.
	fn holds(&self, record: &KeyRecord) -> bool {
		self.installed().is_some_and(|credential| credential.access_token == record.access_token.expose())
	}
}

/// Reads every source independently and keeps the usable credentials.
///
/// A failing or empty source is skipped; so is a credential that is expired with no refresh
/// token. Aggregation itself never fails.
pub fn aggregate(sources: &[Arc<dyn CredentialSource>], now: OffsetDateTime) -> Vec<SourceCredential> {
	let mut found = Vec::new();

	for source in sources {
		match source.read() {
			Ok(Some(credential)) if credential.is_dead_at(now) => {
				tracing::debug!(source = source.label(), "Skipped expired credential without refresh token.");
			},
			Ok(Some(credential)) => found.push(credential),
			Ok(None) => tracing::debug!(source = source.label(), "Credential source is empty."),
			Err(e) => tracing::warn!(source = source.label(), error = %e, "Credential source failed."),
		}
	}

	found
}

/// `claudeAiOauth` credential document shared by the credential file and the keychain entry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OauthDocument {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub access_token: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<String>,
	/// Milliseconds since the Unix epoch.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<i64>,
}
impl OauthDocument {
	pub(crate) const FIELD: &'static str = "claudeAiOauth";

	/// Extracts the document from a parsed credential file.
	pub(crate) fn from_root(label: &str, root: &serde_json::Value) -> Result<Option<Self>, SourceError> {
		let Some(section) = root.get(Self::FIELD) else {
			return Ok(None);
		};

		serde_path_to_error::deserialize(section.clone()).map(Some).map_err(|e| {
			SourceError::Malformed { label: label.to_owned(), message: e.to_string() }
		})
	}

	pub(crate) fn into_credential(self, label: &str) -> Option<SourceCredential> {
		let access_token = self.access_token.filter(|token| !token.trim().is_empty())?;
		let expires_at = self
			.expires_at
			.and_then(|ms| OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok());

		Some(SourceCredential {
			access_token,
			refresh_token: self.refresh_token,
			expires_at,
			source_label: label.to_owned(),
		})
	}

	pub(crate) fn from_record(record: &KeyRecord) -> Self {
		let expires_at = record
			.expires_at
			.and_then(|instant| i64::try_from(instant.unix_timestamp_nanos() / 1_000_000).ok());

		Self {
			access_token: Some(record.access_token.expose().to_owned()),
			refresh_token: record.refresh_token.as_ref().map(|token| token.expose().to_owned()),
			expires_at,
		}
	}
}

/// Parses a full credential document (`{"claudeAiOauth": {...}}`) into a credential.
pub(crate) fn parse_document(label: &str, raw: &str) -> Result<Option<SourceCredential>, SourceError> {
	if raw.trim().is_empty() {
		return Ok(None);
	}

	let root: serde_json::Value = serde_json::from_str(raw)
		.map_err(|e| SourceError::Malformed { label: label.to_owned(), message: e.to_string() })?;

	Ok(OauthDocument::from_root(label, &root)?.and_then(|doc| doc.into_credential(label)))
}
