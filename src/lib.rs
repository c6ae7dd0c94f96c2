//! # Custodia Core
//!
//! A self-sovereign identity core: creating identities, authenticating
//! their holders, protecting key material at rest, and recovering access
//! through a threshold of trusted custodians rather than a central
//! authority.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       CUSTODIA CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐                     │
//! │  │  Identity   │  │  Recovery   │  │ Device Sync │                     │
//! │  │             │  │             │  │             │                     │
//! │  │ - Create    │  │ - Custodians│  │ - Pairing   │                     │
//! │  │ - Auth +    │  │ - Threshold │  │   codes     │                     │
//! │  │   lockout   │  │   approval  │  │ - One-time  │                     │
//! │  │ - Grants    │  │ - Rotation  │  │   bundles   │                     │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘                     │
//! │         │                │                │                            │
//! │         └────────────────┼────────────────┘                            │
//! │                          │            events into SecurityEventLog     │
//! │  ┌─────────────┐  ┌──────▼──────┐  ┌──────────────────────────────┐   │
//! │  │   Crypto    │  │    Store    │  │  Capabilities (external)      │   │
//! │  │             │  │             │  │                               │   │
//! │  │ - Ed25519   │  │ - Encrypted │  │ - NotificationChannel         │   │
//! │  │ - AES-GCM   │  │   at rest   │  │ - SecurityTelemetrySink       │   │
//! │  │ - Argon2id  │  │ - Handle    │  │ - KeyCustodyBackend           │   │
//! │  │ - X25519    │  │   index     │  │                               │   │
//! │  └─────────────┘  └─────────────┘  └──────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`crypto`] - Cryptographic primitives (keys, sealing, KDF, signing)
//! - [`identity`] - Identity lifecycle, authentication, lockout
//! - [`store`] - Encrypted record storage with integrity verification
//! - [`recovery`] - Custodian enrollment and threshold recovery
//! - [`sync`] - One-time device pairing
//! - [`events`] - Append-only security event log
//! - [`payload`] - Signed, self-expiring QR envelopes
//! - [`capability`] - Interfaces to external collaborators
//!
//! ## Security Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SECURITY LAYERS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Layer 1: Key Wrapping (Argon2id + AES-256-GCM)                        │
//! │  ──────────────────────────────────────────────                         │
//! │  Private keys never exist at rest outside an authenticated blob        │
//! │  wrapped under a passcode-derived key with a fresh salt.               │
//! │                                                                         │
//! │  Layer 2: Storage Encryption (AES-256-GCM)                             │
//! │  ─────────────────────────────────────────                              │
//! │  Every persisted record and recovery config is sealed under a          │
//! │  store subkey, with checksum verification on every read.               │
//! │                                                                         │
//! │  Layer 3: Rate-Limited Authentication                                  │
//! │  ────────────────────────────────────                                   │
//! │  Failed attempts count under a per-identity lock; the threshold        │
//! │  locks the identity for a cooldown that is always disclosed.           │
//! │                                                                         │
//! │  Layer 4: Threshold Recovery                                           │
//! │  ───────────────────────────                                            │
//! │  M-of-N custodian approvals authorize a full key rotation; no          │
//! │  single party (including any custodian) can recover alone.             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod capability;
pub mod crypto;
pub mod error;
pub mod events;
pub mod identity;
pub mod payload;
pub mod recovery;
pub mod store;
pub mod sync;
/// Time utilities; all expiry logic reads this clock.
pub mod time;

mod lock;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use crypto::{CryptoCore, EncryptedBlob, KdfConfig, PublicKey};
pub use error::{Error, Result};
pub use events::{SecurityEvent, SecurityEventKind, SecurityEventLog};
pub use identity::{AuthPolicy, IdentityManager, IdentityMetadata, IdentityRecord};
pub use recovery::RecoveryManager;
pub use store::{MemoryBackend, SecureStore, StorageBackend};
pub use sync::DeviceSyncManager;

use std::sync::Arc;
use std::time::Duration;

use crypto::EncryptionKey;
use events::DEFAULT_EVENT_CAPACITY;

// ============================================================================
// CORE INSTANCE
// ============================================================================

/// Configuration for constructing a [`CustodiaCore`]
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Argon2id work factor for passcode key derivation
    pub kdf: KdfConfig,
    /// Lockout policy
    pub auth: AuthPolicy,
    /// Events retained by the security log
    pub event_capacity: usize,
    /// Root key for at-rest encryption; generated fresh when `None`
    /// (records then only outlive the process if the caller keeps the
    /// backend AND supplies the same key next start)
    pub store_root_key: Option<[u8; 32]>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            kdf: KdfConfig::default(),
            auth: AuthPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            store_root_key: None,
        }
    }
}

/// The assembled core: one explicitly constructed instance of every
/// component, wired together at process start
///
/// There is no global state; construct as many isolated cores as needed
/// (tests do exactly that) and pass the instance by reference.
pub struct CustodiaCore {
    crypto: Arc<CryptoCore>,
    store: Arc<SecureStore>,
    events: Arc<SecurityEventLog>,
    identities: Arc<IdentityManager>,
    recovery: Arc<RecoveryManager>,
    device_sync: Arc<DeviceSyncManager>,
}

impl CustodiaCore {
    /// Construct a core over an in-memory backend
    pub fn new(config: CoreConfig) -> Result<Self> {
        Self::with_backend(config, Box::new(MemoryBackend::new()))
    }

    /// Construct a core over a caller-supplied storage backend
    pub fn with_backend(config: CoreConfig, backend: Box<dyn StorageBackend>) -> Result<Self> {
        tracing::info!("Initializing Custodia Core v{}", env!("CARGO_PKG_VERSION"));

        let root_bytes = match config.store_root_key {
            Some(bytes) => bytes,
            None => {
                use rand::RngCore;
                let mut bytes = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                bytes
            }
        };

        let crypto = Arc::new(CryptoCore::new(config.kdf));
        let events = Arc::new(SecurityEventLog::new(config.event_capacity));

        let store = Arc::new(SecureStore::open(
            backend,
            EncryptionKey::from_bytes(root_bytes),
        )?);

        let recovery_seal = crypto::derive_subkey(
            &EncryptionKey::from_bytes(root_bytes),
            crypto::domain::RECOVERY_KEY,
        )?;

        let identities = Arc::new(IdentityManager::new(
            crypto.clone(),
            store.clone(),
            events.clone(),
            config.auth,
        ));
        let recovery = Arc::new(RecoveryManager::new(
            crypto.clone(),
            store.clone(),
            events.clone(),
            recovery_seal,
        ));
        let device_sync = Arc::new(DeviceSyncManager::new(
            crypto.clone(),
            store.clone(),
            events.clone(),
        ));

        Ok(Self {
            crypto,
            store,
            events,
            identities,
            recovery,
            device_sync,
        })
    }

    /// The identity manager
    pub fn identities(&self) -> &Arc<IdentityManager> {
        &self.identities
    }

    /// The recovery manager
    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    /// The device sync manager
    pub fn device_sync(&self) -> &Arc<DeviceSyncManager> {
        &self.device_sync
    }

    /// The security event log
    pub fn events(&self) -> &Arc<SecurityEventLog> {
        &self.events
    }

    /// The crypto core
    pub fn crypto(&self) -> &Arc<CryptoCore> {
        &self.crypto
    }

    /// The secure store
    pub fn store(&self) -> &Arc<SecureStore> {
        &self.store
    }

    /// Spawn the periodic maintenance task
    ///
    /// Clears elapsed lockouts, expires stale recovery requests and
    /// invitations, and drops dead pairing sessions. Every sweep is
    /// idempotent and safe to run concurrently with foreground work;
    /// abort the returned handle to stop.
    pub fn spawn_maintenance(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let identities = self.identities.clone();
        let recovery = self.recovery.clone();
        let device_sync = self.device_sync.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = identities.sweep().await {
                    tracing::warn!("lockout sweep failed: {}", e);
                }
                if let Err(e) = recovery.sweep_expired() {
                    tracing::warn!("recovery sweep failed: {}", e);
                }
                device_sync.sweep_expired();
            }
        })
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Custodia Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ContactChannel;
    use crate::crypto::SigningKeyPair;
    use crate::recovery::{CustodianKind, CustodianSpec, RecoveryDecision, RecoveryStatus, TrustLevel};

    fn test_config() -> CoreConfig {
        CoreConfig {
            kdf: KdfConfig {
                m_cost_kib: 8,
                t_cost: 1,
                p_cost: 1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_isolated_cores_share_nothing() {
        let core1 = CustodiaCore::new(test_config()).unwrap();
        let core2 = CustodiaCore::new(test_config()).unwrap();

        core1.events().record(
            SecurityEventKind::IdentityCreated,
            None,
            "only in core1",
        );
        assert_eq!(core1.events().len(), 1);
        assert!(core2.events().is_empty());
    }

    /// The full lifecycle: create → enroll custodians → recover with a
    /// 2-of-3 threshold → authenticate with the rotated credentials.
    #[tokio::test]
    async fn test_end_to_end_recovery_scenario() {
        let core = CustodiaCore::new(test_config()).unwrap();

        // Create identity `alice`
        let alice = core
            .identities()
            .create_identity("alice", "Tr0ub4dor&3!XY", IdentityMetadata::new("Alice"))
            .await
            .unwrap();

        // Enroll 3 custodians, threshold 2 (the default)
        let mut custodians = Vec::new();
        for name in ["bob", "carol", "dave"] {
            let key = SigningKeyPair::generate();
            let custodian = core
                .recovery()
                .enroll_custodian(
                    &alice.id,
                    CustodianSpec {
                        name: name.to_string(),
                        kind: CustodianKind::Person,
                        contact: ContactChannel::Email(format!("{}@example.com", name)),
                        public_key: key.public_bytes(),
                        trust: TrustLevel::High,
                    },
                )
                .await
                .unwrap();
            let invitation = core
                .recovery()
                .create_invitation(&alice.id, &custodian.id, "Tr0ub4dor&3!XY")
                .await
                .unwrap();
            custodians.push(core.recovery().accept_invitation(&invitation).await.unwrap());
        }

        let config = core.recovery().get_config(&alice.id).unwrap().unwrap();
        assert!(config.is_ready);
        assert_eq!(config.threshold, 2);

        // Initiate recovery
        let request = core
            .recovery()
            .initiate_recovery("alice", ContactChannel::Email("alice@example.com".into()))
            .await
            .unwrap();

        // First approval: still pending with one approval
        let after_one = core
            .recovery()
            .submit_approval(&request.id, &custodians[0].id, RecoveryDecision::Approve)
            .unwrap();
        assert_eq!(after_one.status, RecoveryStatus::Pending);
        assert_eq!(after_one.current_approvals(), 1);

        // Second approval: approved
        let after_two = core
            .recovery()
            .submit_approval(&request.id, &custodians[1].id, RecoveryDecision::Approve)
            .unwrap();
        assert_eq!(after_two.status, RecoveryStatus::Approved);

        // Supply the new passcode; keys rotate
        core.recovery()
            .complete_recovery(&request.id, "N3wP@ssphrase9")
            .await
            .unwrap();

        // New passcode authenticates
        let authed = core
            .identities()
            .authenticate("alice", "N3wP@ssphrase9")
            .await
            .unwrap();
        assert_eq!(authed.id, alice.id);

        // Old passcode fails with an authentication error
        let result = core.identities().authenticate("alice", "Tr0ub4dor&3!XY").await;
        assert!(matches!(result, Err(Error::Authentication)));

        // The audit trail saw the whole story
        let kinds: Vec<SecurityEventKind> = core
            .events()
            .recent(64)
            .into_iter()
            .map(|e| e.kind)
            .collect();
        for expected in [
            SecurityEventKind::IdentityCreated,
            SecurityEventKind::CustodianEnrolled,
            SecurityEventKind::CustodianActivated,
            SecurityEventKind::RecoveryInitiated,
            SecurityEventKind::RecoveryVote,
            SecurityEventKind::RecoveryApproved,
            SecurityEventKind::RecoveryCompleted,
            SecurityEventKind::AuthSuccess,
            SecurityEventKind::AuthFailure,
        ] {
            assert!(kinds.contains(&expected), "missing event {:?}", expected);
        }
    }

    #[tokio::test]
    async fn test_maintenance_task_runs() {
        let core = CustodiaCore::new(test_config()).unwrap();

        let handle = core.spawn_maintenance(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
    }
}
