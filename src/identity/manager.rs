//! # Identity Manager
//!
//! Creates identities, authenticates holders, and manages per-identity
//! security state.
//!
//! ## Authentication State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    AUTHENTICATION STATE MACHINE                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │               wrong passcode                                           │
//! │  ┌──────────┐ ───────────────► ┌──────────────┐                        │
//! │  │ Unlocked │                  │ Unlocked     │                        │
//! │  │ (ctr=0)  │ ◄─────────────── │ (ctr+1)      │                        │
//! │  └──────────┘    success       └──────┬───────┘                        │
//! │       ▲                               │ ctr ≥ max_attempts             │
//! │       │                               ▼                                │
//! │       │  lockout elapses       ┌──────────────┐                        │
//! │       └─────────────────────── │ Locked       │                        │
//! │                                │ (until = now │ ── any attempt ──►     │
//! │                                │  + duration) │    Err(Locked)         │
//! │                                └──────────────┘                        │
//! │                                                                         │
//! │  The check-then-act on the counter runs under a per-identity async     │
//! │  mutex: concurrent attempts against one identity serialize, so the     │
//! │  counter can neither lose updates nor be bypassed by racing.           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Challenge/Response
//!
//! `issue_challenge` binds 32 random bytes to an identity with a short
//! expiry; `verify_signed_challenge` only ever trusts the challenge last
//! issued for that identity, checks expiry at use-time, and consumes the
//! challenge on success.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngCore;

use crate::crypto::{self, CryptoCore, KeyPair, Signature};
use crate::error::{Error, Result};
use crate::events::{SecurityEventKind, SecurityEventLog};
use crate::identity::handle::validate_handle;
use crate::identity::metadata::{IdentityMetadata, MetadataUpdate};
use crate::identity::record::{IdentityRecord, IdentityStatus, ToolGrant};
use crate::identity::Did;
use crate::lock::KeyedMutex;
use crate::store::SecureStore;
use crate::time;

/// Default maximum consecutive failed attempts before lockout
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default lockout duration in seconds (15 minutes)
pub const DEFAULT_LOCKOUT_SECS: i64 = 15 * 60;

/// Challenge lifetime in seconds (5 minutes)
pub const CHALLENGE_TTL_SECS: i64 = 5 * 60;

/// Authentication policy knobs
#[derive(Debug, Clone, Copy)]
pub struct AuthPolicy {
    /// Failed attempts tolerated before locking
    pub max_attempts: u32,
    /// How long a lockout lasts, in seconds
    pub lockout_secs: i64,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_secs: DEFAULT_LOCKOUT_SECS,
        }
    }
}

/// A challenge bound to one identity
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Random bytes to sign
    pub bytes: [u8; 32],
    /// When the challenge lapses (Unix seconds)
    pub expires_at: i64,
}

/// Service managing identity lifecycle and authentication
pub struct IdentityManager {
    crypto: Arc<CryptoCore>,
    store: Arc<SecureStore>,
    events: Arc<SecurityEventLog>,
    policy: AuthPolicy,
    /// Serializes read-modify-write per identity
    auth_locks: KeyedMutex,
    /// Last-issued challenge per identity id
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl IdentityManager {
    /// Create an identity manager
    pub fn new(
        crypto: Arc<CryptoCore>,
        store: Arc<SecureStore>,
        events: Arc<SecurityEventLog>,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            crypto,
            store,
            events,
            policy,
            auth_locks: KeyedMutex::new(),
            challenges: Mutex::new(HashMap::new()),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Create a new identity
    ///
    /// Validates the handle and passcode, generates a key pair, wraps the
    /// private keys under a passcode-derived key with a fresh salt, and
    /// persists the record.
    ///
    /// ## Errors
    ///
    /// - `Validation` for handle or passcode rule violations
    /// - `Conflict` if the handle is already taken
    pub async fn create_identity(
        &self,
        handle: &str,
        passcode: &str,
        mut metadata: IdentityMetadata,
    ) -> Result<IdentityRecord> {
        validate_handle(handle)?;

        let strength = crypto::validate_passcode_strength(passcode);
        if !strength.is_valid {
            return Err(Error::validation("passcode", strength.errors.join("; ")));
        }

        metadata.sanitize()?;

        if self.store.handle_exists(handle) {
            return Err(Error::Conflict(format!("handle {:?} is already taken", handle)));
        }

        let keypair = self.crypto.generate_key_pair();
        let did = Did::from_public_key(&keypair.signing.public_bytes());

        let salt = crypto::generate_salt();
        let wrap_key = self.crypto.derive_passcode_key(passcode, salt).await?;
        let wrapped_keys = self
            .crypto
            .encrypt(
                &wrap_key,
                &*keypair.secret_bytes(),
                salt,
                &IdentityRecord::key_wrap_aad(did.as_str()),
            )
            .await?;

        let now = time::now_timestamp();
        let record = IdentityRecord {
            version: crate::identity::record::RECORD_VERSION,
            id: did.to_string(),
            handle: handle.to_string(),
            public_keys: keypair.public_keys(),
            wrapped_keys,
            revoked_keys: Vec::new(),
            metadata,
            status: IdentityStatus::Active,
            security: Default::default(),
            permissions: HashMap::new(),
            created_at: now,
            updated_at: now,
        };

        self.store.put_record(&record)?;
        self.events
            .record(SecurityEventKind::IdentityCreated, Some(record.id.as_str()), format!("handle {:?}", handle));
        tracing::info!(id = %record.id, handle, "identity created");

        Ok(record)
    }

    /// Delete an identity after verifying its holder
    ///
    /// The delete is a single atomic store operation; there is no partial
    /// record afterwards.
    pub async fn delete_identity(&self, id: &str, passcode: &str) -> Result<()> {
        // Proves holdership and honors lockout state
        let record = self.authenticate_by_id(id, passcode).await?;

        self.store.delete_record(&record.id)?;
        self.challenges.lock().remove(&record.id);
        self.events
            .record(SecurityEventKind::IdentityDeleted, Some(record.id.as_str()), "holder-initiated delete");
        tracing::info!(id = %record.id, "identity deleted");

        Ok(())
    }

    // ========================================================================
    // AUTHENTICATION
    // ========================================================================

    /// Authenticate a holder by handle and passcode
    ///
    /// ## Errors
    ///
    /// - `Locked { retry_after }` while the identity is locked (checked
    ///   before the passcode is even tried)
    /// - `Authentication` on a wrong passcode; the failure counter
    ///   increments and the identity locks at the configured threshold
    /// - `NotFound` for an unknown handle
    pub async fn authenticate(&self, handle: &str, passcode: &str) -> Result<IdentityRecord> {
        let record = self
            .store
            .get_record(handle)?
            .ok_or_else(|| Error::NotFound(format!("identity {:?}", handle)))?;

        self.authenticate_by_id(&record.id, passcode).await
    }

    /// Authenticate against a known identity id
    pub async fn authenticate_by_id(&self, id: &str, passcode: &str) -> Result<IdentityRecord> {
        let lock = self.auth_locks.for_key(id);
        let _guard = lock.lock().await;

        // Re-read under the lock so the counter update cannot be lost
        let mut record = self
            .store
            .get_record(id)?
            .ok_or_else(|| Error::NotFound(format!("identity {}", id)))?;

        let now = time::now_timestamp();
        if let Some(until) = record.security.locked_at(now) {
            self.events.record(
                SecurityEventKind::AuthFailure,
                Some(record.id.as_str()),
                "attempt while locked",
            );
            return Err(Error::Locked { retry_after: until });
        }

        match self.unwrap_keys(&record, passcode).await {
            Ok(_keys) => {
                // Keys drop here; authentication only proves they unwrap
                record.security.register_success(now);
                record.updated_at = now;
                self.store.put_record(&record)?;

                self.events
                    .record(SecurityEventKind::AuthSuccess, Some(record.id.as_str()), "passcode");
                tracing::debug!(id = %record.id, "authenticated");
                Ok(record)
            }
            Err(Error::Integrity(_)) => {
                let locked =
                    record
                        .security
                        .register_failure(self.policy.max_attempts, self.policy.lockout_secs, now);
                record.updated_at = now;
                self.store.put_record(&record)?;

                self.events
                    .record(SecurityEventKind::AuthFailure, Some(record.id.as_str()), "wrong passcode");
                if locked {
                    self.events.record(
                        SecurityEventKind::Lockout,
                        Some(record.id.as_str()),
                        format!("locked until {}", record.security.locked_until.unwrap_or(0)),
                    );
                    tracing::warn!(id = %record.id, "identity locked after repeated failures");
                }
                Err(Error::Authentication)
            }
            Err(other) => Err(other),
        }
    }

    /// Unwrap an identity's private keys for the duration of one operation
    ///
    /// The caller must let the returned `KeyPair` drop before returning;
    /// it zeroizes on drop.
    pub(crate) async fn unwrap_keys(&self, record: &IdentityRecord, passcode: &str) -> Result<KeyPair> {
        let wrap_key = self
            .crypto
            .derive_passcode_key(passcode, record.wrapped_keys.salt)
            .await?;
        let secret = self
            .crypto
            .decrypt(
                &wrap_key,
                &record.wrapped_keys,
                &IdentityRecord::key_wrap_aad(&record.id),
            )
            .await?;

        KeyPair::from_secret_bytes(&secret)
    }

    // ========================================================================
    // CHALLENGE / RESPONSE
    // ========================================================================

    /// Issue a fresh challenge for an identity
    ///
    /// Replaces any previously issued challenge; only the latest is ever
    /// trusted.
    pub fn issue_challenge(&self, id: &str) -> Result<Challenge> {
        if self.store.get_record(id)?.is_none() {
            return Err(Error::NotFound(format!("identity {}", id)));
        }

        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);

        let challenge = Challenge {
            bytes,
            expires_at: time::now_timestamp() + CHALLENGE_TTL_SECS,
        };

        self.challenges.lock().insert(id.to_string(), challenge.clone());
        Ok(challenge)
    }

    /// Verify a signature over a previously issued challenge
    ///
    /// ## Errors
    ///
    /// - `Validation` if the challenge is not the one last issued
    /// - `Expired` if the challenge lapsed (checked at use-time)
    /// - `Authentication` if the signature does not verify
    ///
    /// The challenge is consumed on success.
    pub fn verify_signed_challenge(
        &self,
        id: &str,
        challenge_bytes: &[u8; 32],
        signature: &Signature,
    ) -> Result<()> {
        let record = self
            .store
            .get_record(id)?
            .ok_or_else(|| Error::NotFound(format!("identity {}", id)))?;

        let mut challenges = self.challenges.lock();
        let current = challenges
            .get(id)
            .ok_or_else(|| Error::validation("challenge", "no challenge outstanding"))?;

        if current.bytes != *challenge_bytes {
            return Err(Error::validation("challenge", "not the challenge last issued"));
        }

        let now = time::now_timestamp();
        if now > current.expires_at {
            let expired_at = current.expires_at;
            challenges.remove(id);
            return Err(Error::Expired { expired_at });
        }

        match self.crypto.verify(&record.public_keys.signing, challenge_bytes, signature) {
            Ok(()) => {
                challenges.remove(id);
                self.events
                    .record(SecurityEventKind::AuthSuccess, Some(id), "signed challenge");
                Ok(())
            }
            Err(Error::Integrity(_)) => {
                self.events
                    .record(SecurityEventKind::AuthFailure, Some(id), "bad challenge signature");
                Err(Error::Authentication)
            }
            Err(other) => Err(other),
        }
    }

    // ========================================================================
    // METADATA & PERMISSIONS
    // ========================================================================

    /// Apply metadata updates, sanitizing each before merge
    pub fn update_metadata(&self, id: &str, updates: Vec<MetadataUpdate>) -> Result<IdentityRecord> {
        let mut record = self
            .store
            .get_record(id)?
            .ok_or_else(|| Error::NotFound(format!("identity {}", id)))?;

        for update in updates {
            record.metadata.apply_update(update)?;
        }
        record.updated_at = time::now_timestamp();
        self.store.put_record(&record)?;

        self.events
            .record(SecurityEventKind::MetadataUpdated, Some(record.id.as_str()), "metadata merged");
        Ok(record)
    }

    /// Grant a third-party tool access to this identity
    ///
    /// Pure metadata mutation; key material is untouched.
    pub fn grant_tool_access(
        &self,
        id: &str,
        tool_id: &str,
        scopes: Vec<String>,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let mut record = self
            .store
            .get_record(id)?
            .ok_or_else(|| Error::NotFound(format!("identity {}", id)))?;

        let now = time::now_timestamp();
        if matches!(expires_at, Some(at) if at <= now) {
            return Err(Error::validation("expires_at", "must be in the future"));
        }

        record.permissions.insert(
            tool_id.to_string(),
            ToolGrant {
                scopes: scopes.clone(),
                granted_at: now,
                expires_at,
            },
        );
        record.updated_at = now;
        self.store.put_record(&record)?;

        self.events.record(
            SecurityEventKind::ToolAccessGranted,
            Some(record.id.as_str()),
            format!("tool {:?} scopes {:?}", tool_id, scopes),
        );
        tracing::info!(id = %record.id, tool_id, "tool access granted");
        Ok(())
    }

    /// Revoke a tool's access
    pub fn revoke_tool_access(&self, id: &str, tool_id: &str) -> Result<()> {
        let mut record = self
            .store
            .get_record(id)?
            .ok_or_else(|| Error::NotFound(format!("identity {}", id)))?;

        if record.permissions.remove(tool_id).is_none() {
            return Err(Error::NotFound(format!("grant for tool {:?}", tool_id)));
        }
        record.updated_at = time::now_timestamp();
        self.store.put_record(&record)?;

        self.events.record(
            SecurityEventKind::ToolAccessRevoked,
            Some(record.id.as_str()),
            format!("tool {:?}", tool_id),
        );
        tracing::info!(id = %record.id, tool_id, "tool access revoked");
        Ok(())
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Clear elapsed lockouts and drop expired challenges
    ///
    /// Idempotent; safe to run concurrently with foreground operations.
    pub async fn sweep(&self) -> Result<usize> {
        let now = time::now_timestamp();
        let mut cleared = 0usize;

        for record in self.store.list_records()? {
            if record.security.locked_at(now).is_none() && record.security.locked_until.is_some() {
                let lock = self.auth_locks.for_key(&record.id);
                let _guard = lock.lock().await;

                // Re-read under the lock; foreground may have won
                if let Some(mut fresh) = self.store.get_record(&record.id)? {
                    if fresh.security.clear_elapsed_lockout(now) {
                        fresh.updated_at = now;
                        self.store.put_record(&fresh)?;
                        cleared += 1;
                    }
                }
            }
        }

        self.challenges.lock().retain(|_, c| c.expires_at >= now);
        self.auth_locks.prune();

        if cleared > 0 {
            tracing::debug!(cleared, "lockout sweep");
        }
        Ok(cleared)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionKey, KdfConfig, KEY_SIZE};
    use crate::store::MemoryBackend;

    fn test_manager() -> IdentityManager {
        let crypto = Arc::new(CryptoCore::new(KdfConfig {
            m_cost_kib: 8,
            t_cost: 1,
            p_cost: 1,
        }));
        let store = Arc::new(
            SecureStore::open(
                Box::new(MemoryBackend::new()),
                EncryptionKey::from_bytes([7u8; KEY_SIZE]),
            )
            .unwrap(),
        );
        let events = Arc::new(SecurityEventLog::default());
        IdentityManager::new(
            crypto,
            store,
            events,
            AuthPolicy {
                max_attempts: 3,
                lockout_secs: 900,
            },
        )
    }

    const PASSCODE: &str = "Tr0ub4dor&3!XY";

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let manager = test_manager();

        let record = manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Alice"))
            .await
            .unwrap();
        assert!(record.id.starts_with("did:cstd:z"));
        assert_eq!(record.status, IdentityStatus::Active);

        let authed = manager.authenticate("alice", PASSCODE).await.unwrap();
        assert_eq!(authed.id, record.id);
        assert!(authed.security.last_auth_at.is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_handle() {
        let manager = test_manager();

        let result = manager
            .create_identity("Al", PASSCODE, IdentityMetadata::new("Alice"))
            .await;
        assert!(matches!(result, Err(Error::Validation { field: "handle", .. })));
    }

    #[tokio::test]
    async fn test_create_rejects_weak_passcode() {
        let manager = test_manager();

        let result = manager
            .create_identity("alice", "short", IdentityMetadata::new("Alice"))
            .await;
        assert!(matches!(result, Err(Error::Validation { field: "passcode", .. })));
    }

    #[tokio::test]
    async fn test_duplicate_handle_conflicts() {
        let manager = test_manager();

        manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Alice"))
            .await
            .unwrap();
        let result = manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Imposter"))
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_wrong_passcode_is_authentication_error() {
        let manager = test_manager();
        manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Alice"))
            .await
            .unwrap();

        let result = manager.authenticate("alice", "N3wP@ssphrase9").await;
        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[tokio::test]
    async fn test_lockout_after_max_attempts() {
        let manager = test_manager();
        manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Alice"))
            .await
            .unwrap();

        for _ in 0..3 {
            let result = manager.authenticate("alice", "N3wP@ssphrase9").await;
            assert!(matches!(result, Err(Error::Authentication)));
        }

        // Locked now, even with the correct passcode
        let result = manager.authenticate("alice", PASSCODE).await;
        match result {
            Err(Error::Locked { retry_after }) => {
                assert!(retry_after > time::now_timestamp());
            }
            other => panic!("expected Locked, got {:?}", other.map(|r| r.id)),
        }
    }

    #[tokio::test]
    async fn test_concurrent_failures_do_not_lose_updates() {
        let manager = Arc::new(test_manager());
        manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Alice"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let _ = manager.authenticate("alice", "N3wP@ssphrase9").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Exactly three failures must have been counted: locked
        let result = manager.authenticate("alice", PASSCODE).await;
        assert!(matches!(result, Err(Error::Locked { .. })));
    }

    #[tokio::test]
    async fn test_challenge_round_trip() {
        let manager = test_manager();
        let record = manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Alice"))
            .await
            .unwrap();

        let challenge = manager.issue_challenge(&record.id).unwrap();

        // The holder signs with their unwrapped key
        let keys = manager.unwrap_keys(&record, PASSCODE).await.unwrap();
        let signature = crypto::sign(&keys.signing, &challenge.bytes);

        manager
            .verify_signed_challenge(&record.id, &challenge.bytes, &signature)
            .unwrap();

        // Consumed: a second verification fails
        let result = manager.verify_signed_challenge(&record.id, &challenge.bytes, &signature);
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_stale_challenge_rejected() {
        let manager = test_manager();
        let record = manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Alice"))
            .await
            .unwrap();

        let first = manager.issue_challenge(&record.id).unwrap();
        let _second = manager.issue_challenge(&record.id).unwrap();

        let keys = manager.unwrap_keys(&record, PASSCODE).await.unwrap();
        let signature = crypto::sign(&keys.signing, &first.bytes);

        // Only the latest challenge is trusted
        let result = manager.verify_signed_challenge(&record.id, &first.bytes, &signature);
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_tool_grant_and_revoke() {
        let manager = test_manager();
        let record = manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Alice"))
            .await
            .unwrap();

        manager
            .grant_tool_access(&record.id, "calendar", vec!["profile:read".into()], None)
            .unwrap();

        let fetched = manager.store.get_record(&record.id).unwrap().unwrap();
        assert!(fetched.permissions.contains_key("calendar"));

        manager.revoke_tool_access(&record.id, "calendar").unwrap();
        let fetched = manager.store.get_record(&record.id).unwrap().unwrap();
        assert!(!fetched.permissions.contains_key("calendar"));

        // Revoking again is NotFound
        let result = manager.revoke_tool_access(&record.id, "calendar");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_metadata_sanitizes() {
        let manager = test_manager();
        let record = manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Alice"))
            .await
            .unwrap();

        let result = manager.update_metadata(
            &record.id,
            vec![MetadataUpdate::DisplayName("<script>x</script>".into())],
        );
        assert!(matches!(result, Err(Error::Validation { .. })));

        let updated = manager
            .update_metadata(
                &record.id,
                vec![MetadataUpdate::DisplayName("Alice Liddell".into())],
            )
            .unwrap();
        assert_eq!(updated.metadata.display_name, "Alice Liddell");
    }

    #[tokio::test]
    async fn test_delete_identity() {
        let manager = test_manager();
        let record = manager
            .create_identity("alice", PASSCODE, IdentityMetadata::new("Alice"))
            .await
            .unwrap();

        // Wrong passcode cannot delete
        let result = manager.delete_identity(&record.id, "N3wP@ssphrase9").await;
        assert!(matches!(result, Err(Error::Authentication)));

        manager.delete_identity(&record.id, PASSCODE).await.unwrap();
        assert!(manager.store.get_record("alice").unwrap().is_none());
    }
}
