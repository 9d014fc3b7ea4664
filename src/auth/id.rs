//! Strongly typed identifiers for keys and accounts.

// std
use std::{borrow::Borrow, ops::Deref};
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}

			/// Returns the leading characters of the identifier for log lines.
			pub fn short(&self) -> &str {
				let end = self.0.char_indices().nth(SHORT_LEN).map_or(self.0.len(), |(idx, _)| idx);

				&self.0[..end]
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;
const KEY_ID_LEN: usize = 32;
const SHORT_LEN: usize = 8;
/// Prefixes stripped before hashing so differently labelled copies of one secret collide.
const SECRET_PREFIXES: &[&str] = &["Bearer ", "sk-ant-oat01-", "sk-ant-ort01-", "sk-ant-api03-"];

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty or whitespace.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (key, account).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (key, account).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (key, account).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { KeyId, "Registry identifier derived from a credential's secret material.", "Key" }
def_id! { AccountId, "Identifier of the upstream account that owns one or more keys.", "Account" }

impl KeyId {
	/// Derives the identifier for an access token.
	///
	/// Known prefixes and surrounding whitespace are stripped first, then the remainder is
	/// hashed with SHA-256 and encoded as URL-safe base64. The digest is one-way, so the
	/// identifier can be logged and persisted without exposing the secret.
	pub fn derive(access_token: &str) -> Self {
		let digest = Sha256::digest(normalize_secret(access_token).as_bytes());
		let mut encoded = URL_SAFE_NO_PAD.encode(digest);

		encoded.truncate(KEY_ID_LEN);

		Self(encoded)
	}
}

fn normalize_secret(raw: &str) -> &str {
	let mut view = raw.trim();

	for prefix in SECRET_PREFIXES {
		if let Some(rest) = view.strip_prefix(prefix) {
			view = rest.trim_start();
		}
	}

	view
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}
