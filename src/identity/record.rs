//! # Identity Record
//!
//! The durable representation of an identity, exactly what the store
//! persists: the content-addressed id, the immutable handle, public key
//! material, the passcode-wrapped private keys, holder metadata,
//! lifecycle status, authentication security state, and tool grants.
//!
//! Private keys appear only as an [`EncryptedBlob`]; nothing in a record
//! is secret on its own.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptedBlob, PublicKey};
use crate::identity::metadata::IdentityMetadata;

/// Lifecycle status of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    /// Normal operation
    Active,
    /// A recovery request is in flight
    Recovering,
    /// Deactivated by the holder
    Inactive,
}

impl IdentityStatus {
    /// Convert to storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Recovering => "recovering",
            IdentityStatus::Inactive => "inactive",
        }
    }

    /// Parse from storage string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(IdentityStatus::Active),
            "recovering" => Some(IdentityStatus::Recovering),
            "inactive" => Some(IdentityStatus::Inactive),
            _ => None,
        }
    }
}

/// Per-identity authentication state
///
/// The failure counter and lockout timestamp drive the rate-limit state
/// machine; all mutation happens under the manager's per-identity lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityState {
    /// Consecutive failed authentication attempts
    pub failed_attempts: u32,
    /// Locked until this Unix timestamp, when set
    pub locked_until: Option<i64>,
    /// Last successful authentication
    pub last_auth_at: Option<i64>,
}

impl SecurityState {
    /// Returns the lockout expiry if the identity is locked at `now`
    pub fn locked_at(&self, now: i64) -> Option<i64> {
        match self.locked_until {
            Some(until) if until > now => Some(until),
            _ => None,
        }
    }

    /// Record a failed attempt, locking once the threshold is reached
    ///
    /// Returns true if this failure triggered a lockout.
    pub fn register_failure(&mut self, max_attempts: u32, lockout_secs: i64, now: i64) -> bool {
        // An elapsed lockout resets the window before counting
        if self.locked_until.is_some() && self.locked_at(now).is_none() {
            self.failed_attempts = 0;
            self.locked_until = None;
        }

        self.failed_attempts += 1;
        if self.failed_attempts >= max_attempts {
            self.locked_until = Some(now + lockout_secs);
            return true;
        }
        false
    }

    /// Record a successful authentication
    pub fn register_success(&mut self, now: i64) {
        self.failed_attempts = 0;
        self.locked_until = None;
        self.last_auth_at = Some(now);
    }

    /// Clear an elapsed lockout (maintenance sweep)
    ///
    /// Returns true if state changed. Safe to call concurrently with
    /// foreground operations; clearing an already-clear lockout is a no-op.
    pub fn clear_elapsed_lockout(&mut self, now: i64) -> bool {
        match self.locked_until {
            Some(until) if until <= now => {
                self.failed_attempts = 0;
                self.locked_until = None;
                true
            }
            _ => false,
        }
    }
}

/// An access grant to a third-party tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolGrant {
    /// Granted scopes
    pub scopes: Vec<String>,
    /// When the grant was made
    pub granted_at: i64,
    /// When the grant lapses, if ever
    pub expires_at: Option<i64>,
}

impl ToolGrant {
    /// Whether the grant has lapsed at `now`
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if now > at)
    }
}

/// Current record schema version
pub const RECORD_VERSION: u16 = 1;

/// The durable identity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Record schema version
    pub version: u16,
    /// Content-addressed identifier (minted from the original public key,
    /// immutable across key rotation)
    pub id: String,
    /// Unique human-chosen name; the id↔handle mapping never changes
    pub handle: String,
    /// Current public key material
    pub public_keys: PublicKey,
    /// Private keys wrapped under a passcode-derived key
    pub wrapped_keys: EncryptedBlob,
    /// Public keys retired by recovery, newest last
    pub revoked_keys: Vec<PublicKey>,
    /// Holder-mutable metadata
    pub metadata: IdentityMetadata,
    /// Lifecycle status
    pub status: IdentityStatus,
    /// Authentication security state
    pub security: SecurityState,
    /// Tool id → access grant
    pub permissions: HashMap<String, ToolGrant>,
    /// When the identity was created (Unix seconds)
    pub created_at: i64,
    /// Last mutation (Unix seconds)
    pub updated_at: i64,
}

impl IdentityRecord {
    /// AAD binding a record's wrapped keys to this identity
    ///
    /// Prevents a wrapped-key blob from being transplanted between
    /// records.
    pub fn key_wrap_aad(id: &str) -> Vec<u8> {
        let mut aad = Vec::with_capacity(9 + id.len());
        aad.extend_from_slice(b"wrapped:");
        aad.extend_from_slice(id.as_bytes());
        aad
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            IdentityStatus::Active,
            IdentityStatus::Recovering,
            IdentityStatus::Inactive,
        ] {
            assert_eq!(IdentityStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(IdentityStatus::parse("deleted"), None);
    }

    #[test]
    fn test_failure_counter_locks_at_threshold() {
        let mut state = SecurityState::default();

        assert!(!state.register_failure(3, 900, 1000));
        assert!(!state.register_failure(3, 900, 1001));
        assert!(state.register_failure(3, 900, 1002));

        assert_eq!(state.locked_at(1003), Some(1902));
        assert_eq!(state.locked_at(1902), None);
    }

    #[test]
    fn test_elapsed_lockout_resets_counter() {
        let mut state = SecurityState::default();
        for t in 0..3 {
            state.register_failure(3, 900, 1000 + t);
        }
        assert!(state.locked_at(1100).is_some());

        // A failure after expiry starts a fresh window
        let locked = state.register_failure(3, 900, 3000);
        assert!(!locked);
        assert_eq!(state.failed_attempts, 1);
    }

    #[test]
    fn test_success_clears_state() {
        let mut state = SecurityState::default();
        state.register_failure(3, 900, 1000);
        state.register_success(1010);

        assert_eq!(state.failed_attempts, 0);
        assert!(state.locked_until.is_none());
        assert_eq!(state.last_auth_at, Some(1010));
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let mut state = SecurityState::default();
        for t in 0..3 {
            state.register_failure(3, 900, 1000 + t);
        }

        assert!(state.clear_elapsed_lockout(2000));
        assert!(!state.clear_elapsed_lockout(2000));
        assert!(!state.clear_elapsed_lockout(2001));
    }

    #[test]
    fn test_tool_grant_expiry() {
        let grant = ToolGrant {
            scopes: vec!["profile:read".into()],
            granted_at: 1000,
            expires_at: Some(2000),
        };

        assert!(!grant.is_expired(1500));
        assert!(!grant.is_expired(2000));
        assert!(grant.is_expired(2001));

        let open_ended = ToolGrant {
            scopes: vec![],
            granted_at: 1000,
            expires_at: None,
        };
        assert!(!open_ended.is_expired(i64::MAX));
    }
}
