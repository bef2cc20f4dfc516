//! Persisting the opaque bearer token across restarts for auto-login.

use std::fs;
use std::path::Path;

use log::warn;

/// Read a previously saved token, if any. Absence or a read error is not
/// fatal - the caller falls back to interactive login.
pub fn load_token(path: impl AsRef<Path>) -> Option<String> {
	match fs::read_to_string(path.as_ref()) {
		Ok(token) => {
			let token = token.trim().to_owned();
			(!token.is_empty()).then_some(token)
		}
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
		Err(err) => {
			warn!("Failed to read persisted token from {}: {err}", path.as_ref().display());
			None
		}
	}
}

/// Persist `token`, overwriting whatever was there before.
pub fn save_token(path: impl AsRef<Path>, token: &str) {
	if let Err(err) = fs::write(path.as_ref(), token) {
		warn!("Failed to persist token to {}: {err}", path.as_ref().display());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_through_a_file() {
		let dir = std::env::temp_dir().join(format!("relay-token-test-{:?}", std::thread::current().id()));
		fs::create_dir_all(&dir).unwrap();
		let path = dir.join("token");

		save_token(&path, "abc123");
		assert_eq!(load_token(&path), Some("abc123".to_owned()));

		fs::remove_dir_all(&dir).ok();
	}

	#[test]
	fn missing_file_is_none() {
		assert_eq!(load_token("/nonexistent/path/to/token/file"), None);
	}
}
