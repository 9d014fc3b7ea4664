//! Append-only audit trail for rotations and their verification.
//!
//! Lines look like `<rfc3339> <event> key=value ...`. Only short key identifiers are written;
//! token material never reaches the log.

// std
use std::{
	fs::{self, OpenOptions},
	io::Write,
};
// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::{_prelude::*, store::StoreError};

/// File-backed audit log.
#[derive(Debug)]
pub struct AuditLog {
	path: PathBuf,
	guard: Mutex<()>,
}
impl AuditLog {
	/// Appends to the log at `path`, creating it on first use.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into(), guard: Mutex::new(()) }
	}

	/// Default location under the user's home directory.
	pub fn default_path() -> Option<PathBuf> {
		dirs::home_dir().map(|home| home.join(".claude").join("api-key-rotation-audit.log"))
	}

	/// Log path.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Appends one event line.
	pub fn record(
		&self,
		at: OffsetDateTime,
		event: &str,
		fields: &[(&str, String)],
	) -> Result<(), StoreError> {
		let line = format_line(at, event, fields);
		let _guard = self.guard.lock();

		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create audit directory {}: {e}", parent.display()),
			})?;
		}

		let mut file =
			OpenOptions::new().create(true).append(true).open(&self.path).map_err(|e| {
				StoreError::Backend { message: format!("Failed to open {}: {e}", self.path.display()) }
			})?;

		file.write_all(line.as_bytes()).map_err(|e| StoreError::Backend {
			message: format!("Failed to append to {}: {e}", self.path.display()),
		})
	}

	/// Reads all lines back; missing logs read as empty.
	pub fn lines(&self) -> Vec<String> {
		fs::read_to_string(&self.path)
			.map(|raw| raw.lines().map(str::to_owned).collect())
			.unwrap_or_default()
	}
}

/// Renders a single audit line, newline included.
pub fn format_line(at: OffsetDateTime, event: &str, fields: &[(&str, String)]) -> String {
	let stamp = at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string());
	let mut line = format!("{stamp} {event}");

	for (name, value) in fields {
		line.push(' ');
		line.push_str(name);
		line.push('=');

		if value.is_empty() || value.chars().any(char::is_whitespace) {
			line.push_str(&format!("{value:?}"));
		} else {
			line.push_str(value);
		}
	}

	line.push('\n');

	line
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn formats_fields_and_quotes_spaces() {
		let line = format_line(
			macros::datetime!(2025-01-01 00:00 UTC),
			"rotation_verified",
			&[("from", "abcd1234".into()), ("reason", "usage high".into()), ("installed", "true".into())],
		);

		assert_eq!(
			line,
			"2025-01-01T00:00:00Z rotation_verified from=abcd1234 reason=\"usage high\" installed=true\n"
		);
	}

	#[test]
	fn appends_lines_in_order() {
		let path = env::temp_dir().join(format!(
			"quota_rotator_audit_{}_{}.log",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		));
		let log = AuditLog::new(&path);
		let at = macros::datetime!(2025-01-01 00:00 UTC);

		log.record(at, "rotation", &[("to", "k1".into())]).expect("First append should succeed.");
		log.record(at, "rotation", &[("to", "k2".into())]).expect("Second append should succeed.");

		let lines = log.lines();

		assert_eq!(lines.len(), 2);
		assert!(lines[1].ends_with("to=k2"));

		let _ = fs::remove_file(path);
	}
}
