//! # Handle Validation
//!
//! Handles are unique, human-chosen names with an immutable mapping to an
//! identity id. Rules: 3-20 characters, lowercase alphanumeric plus
//! hyphen, no leading/trailing/double hyphen, not on the reserved list.

use crate::error::{Error, Result};

/// Minimum handle length
pub const MIN_HANDLE_LENGTH: usize = 3;

/// Maximum handle length
pub const MAX_HANDLE_LENGTH: usize = 20;

/// Names that cannot be claimed as handles
const RESERVED_HANDLES: &[&str] = &[
    "admin", "administrator", "root", "system", "support", "help", "security", "official",
    "custodia", "recovery", "api", "www",
];

/// Validate a handle against the naming rules
///
/// Returns the handle unchanged on success so call sites can validate
/// inline: `let handle = validate_handle(input)?;`
pub fn validate_handle(handle: &str) -> Result<&str> {
    let len = handle.chars().count();
    if len < MIN_HANDLE_LENGTH || len > MAX_HANDLE_LENGTH {
        return Err(Error::validation(
            "handle",
            format!(
                "must be {}-{} characters, got {}",
                MIN_HANDLE_LENGTH, MAX_HANDLE_LENGTH, len
            ),
        ));
    }

    if !handle
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::validation(
            "handle",
            "may only contain lowercase letters, digits, and hyphens",
        ));
    }

    if handle.starts_with('-') || handle.ends_with('-') || handle.contains("--") {
        return Err(Error::validation(
            "handle",
            "hyphens may not lead, trail, or repeat",
        ));
    }

    if RESERVED_HANDLES.contains(&handle) {
        return Err(Error::validation("handle", format!("{:?} is reserved", handle)));
    }

    Ok(handle)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_handles() {
        assert!(validate_handle("alice").is_ok());
        assert!(validate_handle("alice-2024").is_ok());
        assert!(validate_handle("a1b").is_ok());
        assert!(validate_handle("exactly-20-chars-ok1").is_ok());
    }

    #[test]
    fn test_length_bounds() {
        assert!(validate_handle("ab").is_err());
        assert!(validate_handle("this-handle-is-way-too-long").is_err());
    }

    #[test]
    fn test_charset() {
        assert!(validate_handle("Alice").is_err());
        assert!(validate_handle("alice_b").is_err());
        assert!(validate_handle("alice!").is_err());
        assert!(validate_handle("ալիս-հէյ").is_err());
    }

    #[test]
    fn test_hyphen_placement() {
        assert!(validate_handle("-alice").is_err());
        assert!(validate_handle("alice-").is_err());
        assert!(validate_handle("ali--ce").is_err());
    }

    #[test]
    fn test_reserved_names_rejected() {
        assert!(validate_handle("admin").is_err());
        assert!(validate_handle("recovery").is_err());
        // Prefixed reserved words are fine
        assert!(validate_handle("admin-alice").is_ok());
    }
}
