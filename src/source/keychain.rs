//! OS keychain credential source backed by the `keyring` crate.

// std
use std::env;
// self
use crate::{
	_prelude::*,
	source::{CredentialSource, SourceCredential, SourceError, parse_document},
};

/// Default keychain service holding the credential document.
pub const DEFAULT_SERVICE: &str = "Claude Code-credentials";

/// Reads the credential document stored under a keychain service/account entry.
#[derive(Clone, Debug)]
pub struct KeychainSource {
	service: String,
	account: String,
	label: String,
}
impl KeychainSource {
	/// Uses the entry at `service`/`account`.
	pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
		let service = service.into();
		let account = account.into();
		let label = format!("keychain:{service}");

		Self { service, account, label }
	}
}
impl Default for KeychainSource {
	fn default() -> Self {
		let account = env::var("USER").or_else(|_| env::var("USERNAME")).unwrap_or_default();

		Self::new(DEFAULT_SERVICE, account)
	}
}
impl CredentialSource for KeychainSource {
	fn label(&self) -> &str {
		&self.label
	}

	fn read(&self) -> Result<Option<SourceCredential>, SourceError> {
		let unavailable =
			|e: keyring::Error| SourceError::Unavailable { label: self.label.clone(), message: e.to_string() };
		let entry = keyring::Entry::new(&self.service, &self.account).map_err(unavailable)?;

		match entry.get_password() {
			Ok(raw) => parse_document(&self.label, &raw),
			Err(keyring::Error::NoEntry) => Ok(None),
			Err(e) => Err(unavailable(e)),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn label_names_the_service() {
		let source = KeychainSource::new("svc", "someone");

		assert_eq!(source.label(), "keychain:svc");
		assert_eq!(KeychainSource::default().service, DEFAULT_SERVICE);
	}
}
