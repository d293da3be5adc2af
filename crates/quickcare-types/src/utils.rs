//! Small helpers shared by several crates.

use uuid::Uuid;

/// Generates a fresh row identifier.
pub fn new_id() -> String {
	Uuid::new_v4().to_string()
}

/// Shortens an identifier for log output: the first 8 characters followed
/// by `..`, or the whole id if it is already short.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((cut, _)) => format!("{}..", &id[..cut]),
		None => id.to_string(),
	}
}
