//! # Error Handling
//!
//! This module provides comprehensive error types for Custodia Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Caller Errors                                                     │
//! │  │   ├── Validation           - Malformed input, rule violation        │
//! │  │   └── Conflict             - Duplicate handle, consumed session     │
//! │  │                                                                      │
//! │  ├── Authentication Errors                                             │
//! │  │   ├── Authentication       - Wrong passcode or signature            │
//! │  │   ├── Locked               - Rate limit triggered (has retry-after) │
//! │  │   └── Expired              - Challenge/session/request past expiry  │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── Integrity            - Checksum/tag mismatch (tamper)         │
//! │  │   ├── EncryptionFailed     - Encryption operation failed            │
//! │  │   ├── KeyDerivationFailed  - Failed to derive keys                  │
//! │  │   ├── InvalidKey           - Invalid key format/length              │
//! │  │   └── CustodyUnavailable   - External key custody backend failed    │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── StorageRead          - Failed to read from storage            │
//! │  │   ├── StorageWrite         - Failed to write to storage             │
//! │  │   └── NotFound             - Record not found                       │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      ├── Serialization        - Encode/decode failure                  │
//! │      └── Internal             - Should not happen in normal operation  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation Policy
//!
//! | Category | Policy |
//! |----------|--------|
//! | Validation / Conflict | Structured detail so the caller can correct input |
//! | Locked / Expired | Always carry the retry/expiry timestamp, never raw counters |
//! | Integrity | Non-recoverable for the blob; treated as tamper, never auto-repaired |
//! | Storage | Recoverable via retry at the caller's discretion |

use thiserror::Error;

/// Result type alias for Custodia Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Custodia Core
///
/// All errors are categorized by domain to make error handling clearer
/// and to provide meaningful error messages to callers.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Caller Errors (100-199)
    // ========================================================================

    /// Malformed input or rule violation
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// The input field that failed validation
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Duplicate handle, already-consumed session, or similar clash
    #[error("Conflict: {0}")]
    Conflict(String),

    // ========================================================================
    // Authentication Errors (200-299)
    // ========================================================================

    /// Wrong passcode or signature (increments lockout state)
    #[error("Authentication failed")]
    Authentication,

    /// Rate limit triggered; retry after the given Unix timestamp
    #[error("Account locked until {retry_after}")]
    Locked {
        /// Unix timestamp at which authentication may be retried
        retry_after: i64,
    },

    /// Challenge, session, or request is past its expiry
    #[error("Expired at {expired_at}")]
    Expired {
        /// Unix timestamp at which the artifact expired
        expired_at: i64,
    },

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Checksum or authentication tag mismatch on decrypt/verify
    ///
    /// Treated as tamper or corruption: never downgraded, never auto-repaired.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// External key custody backend rejected or failed the operation
    #[error("Key custody backend unavailable: {0}")]
    CustodyUnavailable(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageRead(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWrite(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for validation failures
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Caller errors
    /// - 200-299: Authentication
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Caller (100-199)
            Error::Validation { .. } => 100,
            Error::Conflict(_) => 101,

            // Authentication (200-299)
            Error::Authentication => 200,
            Error::Locked { .. } => 201,
            Error::Expired { .. } => 202,

            // Crypto (300-399)
            Error::Integrity(_) => 300,
            Error::EncryptionFailed(_) => 301,
            Error::KeyDerivationFailed(_) => 302,
            Error::InvalidKey(_) => 303,
            Error::CustodyUnavailable(_) => 304,

            // Storage (400-499)
            Error::StorageRead(_) => 400,
            Error::StorageWrite(_) => 401,
            Error::NotFound(_) => 402,

            // Internal (900-999)
            Error::Serialization(_) => 900,
            Error::Internal(_) => 901,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can potentially be resolved by retrying, waiting,
    /// or correcting input. Integrity failures are never recoverable for
    /// the affected blob.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::Integrity(_) | Error::Internal(_) | Error::Serialization(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::validation("handle", "too short").code(), 100);
        assert_eq!(Error::Authentication.code(), 200);
        assert_eq!(Error::Integrity("tag mismatch".into()).code(), 300);
        assert_eq!(Error::StorageRead("io".into()).code(), 400);
        assert_eq!(Error::Internal("bug".into()).code(), 901);
    }

    #[test]
    fn test_integrity_not_recoverable() {
        assert!(!Error::Integrity("checksum".into()).is_recoverable());
        assert!(Error::Locked { retry_after: 0 }.is_recoverable());
        assert!(Error::Conflict("handle taken".into()).is_recoverable());
    }

    #[test]
    fn test_locked_discloses_retry_after() {
        let err = Error::Locked { retry_after: 1_700_000_000 };
        assert!(err.to_string().contains("1700000000"));
    }

    #[test]
    fn test_validation_names_field() {
        let err = Error::validation("passcode", "must be at least 12 characters");
        assert!(err.to_string().contains("passcode"));
        assert!(err.to_string().contains("12 characters"));
    }
}
