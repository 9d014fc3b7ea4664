//! Environment-variable credential source.

// std
use std::env;
// self
use crate::{
	_prelude::*,
	source::{CredentialSource, SourceCredential, SourceError},
};

/// Default variable holding a bare OAuth access token.
pub const DEFAULT_TOKEN_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";

/// Reads a bare access token (no refresh token, no expiry) from an environment variable.
#[derive(Clone, Debug)]
pub struct EnvSource {
	variable: String,
	label: String,
}
impl EnvSource {
	/// Reads from `variable`.
	pub fn new(variable: impl Into<String>) -> Self {
		let variable = variable.into();
		let label = format!("env:{variable}");

		Self { variable, label }
	}
}
impl Default for EnvSource {
	fn default() -> Self {
		Self::new(DEFAULT_TOKEN_VAR)
	}
}
impl CredentialSource for EnvSource {
	fn label(&self) -> &str {
		&self.label
	}

	fn read(&self) -> Result<Option<SourceCredential>, SourceError> {
		match env::var(&self.variable) {
			Ok(value) if !value.trim().is_empty() => Ok(Some(SourceCredential {
				access_token: value.trim().to_owned(),
				refresh_token: None,
				expires_at: None,
				source_label: self.label.clone(),
			})),
			Ok(_) | Err(env::VarError::NotPresent) => Ok(None),
			Err(env::VarError::NotUnicode(_)) => Err(SourceError::Malformed {
				label: self.label.clone(),
				message: "value is not valid unicode".into(),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn missing_variable_reads_as_empty() {
		let source = EnvSource::new("QUOTA_ROTATOR_TEST_SURELY_UNSET_VARIABLE");

		assert_eq!(source.label(), "env:QUOTA_ROTATOR_TEST_SURELY_UNSET_VARIABLE");
		assert_eq!(source.read(), Ok(None));
	}

	#[test]
	fn present_variable_yields_bare_token() {
		let source = EnvSource::new("PATH");
		let credential = source
			.read()
			.expect("PATH should be readable.")
			.expect("PATH should be set in test environments.");

		assert!(credential.refresh_token.is_none());
		assert!(credential.expires_at.is_none());
		assert_eq!(credential.source_label, "env:PATH");
	}
}
