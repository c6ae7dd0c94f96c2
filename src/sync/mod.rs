//! # Device Sync
//!
//! Short-lived pairing for linking a second device to an existing
//! identity.
//!
//! ## Pairing Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DEVICE PAIRING FLOW                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  HOST DEVICE                                NEW DEVICE                 │
//! │  ─────────────────────────────────────────────────────────────         │
//! │                                                                         │
//! │  initiate(identity, device_info)                                       │
//! │    │ random pairing code (15 min TTL)                                  │
//! │    │ ephemeral X25519 key pair                                         │
//! │    │                                                                   │
//! │    │  code shown to holder ────────────► holder enters code            │
//! │    │                                     device generates X25519 pair  │
//! │    │                                                                   │
//! │    │        complete(code, device_public_key)                          │
//! │    │ ◄──────────────────────────────────                               │
//! │    │                                                                   │
//! │    ▼                                                                   │
//! │  consume code atomically (single use)                                  │
//! │  sync_key = HKDF(DH(host_ephemeral, device_public), salt = code)       │
//! │  SyncBundle = { host_public, AEAD(sync_key, identity record) }         │
//! │    │                                                                   │
//! │    │ ──────────────────────────────────► device derives the same key,  │
//! │    │                                     decrypts, stores the record   │
//! │    │                                     (private keys stay passcode-  │
//! │    │                                      wrapped inside the bundle)   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Codes are one-time: lookup-and-remove happens under a single lock, so
//! two racing completions cannot both succeed. Expiry is a predicate
//! checked at use-time.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::{self, AgreementKeyPair, CryptoCore, EncryptedBlob};
use crate::error::{Error, Result};
use crate::events::{SecurityEventKind, SecurityEventLog};
use crate::store::SecureStore;
use crate::time;

/// Pairing code lifetime in seconds (15 minutes)
pub const PAIRING_TTL_SECS: i64 = 15 * 60;

/// How long consumed-code markers are kept for error reporting (1 hour)
const CONSUMED_RETENTION_SECS: i64 = 60 * 60;

/// Pairing code alphabet: unambiguous uppercase letters and digits
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Pairing code length (excluding the separator)
const CODE_LEN: usize = 8;

/// What kind of device is pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Phone or tablet
    Mobile,
    /// Desktop or laptop
    Desktop,
    /// Browser session
    Web,
}

/// Identifying details of the pairing device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Caller-chosen device identifier
    pub device_id: String,
    /// Device class
    pub device_type: DeviceType,
}

/// A pairing session as handed back to the initiating caller
#[derive(Debug, Clone)]
pub struct SyncSession {
    /// The one-time pairing code to show the holder
    pub pairing_code: String,
    /// The device this session was opened for
    pub device: DeviceInfo,
    /// When the code lapses (Unix seconds)
    pub expires_at: i64,
}

/// The encrypted key material handed to the new device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBundle {
    /// The identity being synced
    pub identity_id: String,
    /// Host's ephemeral X25519 public key (for deriving the sync key)
    #[serde(with = "crate::crypto::hex_bytes")]
    pub host_public: [u8; 32],
    /// Identity record sealed under the sync key; private keys inside
    /// remain passcode-wrapped
    pub payload: EncryptedBlob,
}

/// Host side of an open pairing session
struct OpenSession {
    identity_id: String,
    device: DeviceInfo,
    host_keys: AgreementKeyPair,
    expires_at: i64,
}

/// Sessions and consumed markers behind one lock: consumption is atomic
#[derive(Default)]
struct SyncState {
    sessions: HashMap<String, OpenSession>,
    consumed: HashMap<String, i64>,
}

/// Service managing device pairing sessions
pub struct DeviceSyncManager {
    crypto: Arc<CryptoCore>,
    store: Arc<SecureStore>,
    events: Arc<SecurityEventLog>,
    state: Mutex<SyncState>,
}

impl DeviceSyncManager {
    /// Create a device sync manager
    pub fn new(
        crypto: Arc<CryptoCore>,
        store: Arc<SecureStore>,
        events: Arc<SecurityEventLog>,
    ) -> Self {
        Self {
            crypto,
            store,
            events,
            state: Mutex::new(SyncState::default()),
        }
    }

    /// Open a pairing session for an identity
    pub fn initiate(&self, identity_id: &str, device: DeviceInfo) -> Result<SyncSession> {
        if self.store.get_record(identity_id)?.is_none() {
            return Err(Error::NotFound(format!("identity {}", identity_id)));
        }

        let mut state = self.state.lock();

        let pairing_code = loop {
            let code = generate_pairing_code();
            if !state.sessions.contains_key(&code) && !state.consumed.contains_key(&code) {
                break code;
            }
        };

        let expires_at = time::now_timestamp() + PAIRING_TTL_SECS;
        state.sessions.insert(
            pairing_code.clone(),
            OpenSession {
                identity_id: identity_id.to_string(),
                device: device.clone(),
                host_keys: AgreementKeyPair::generate(),
                expires_at,
            },
        );

        self.events.record(
            SecurityEventKind::SyncInitiated,
            Some(identity_id),
            format!("device {:?} ({:?})", device.device_id, device.device_type),
        );
        tracing::info!(identity = identity_id, device = %device.device_id, "pairing session opened");

        Ok(SyncSession {
            pairing_code,
            device,
            expires_at,
        })
    }

    /// Complete pairing: consume the code and build the sync bundle
    ///
    /// ## Errors
    ///
    /// - `Expired` for a code past its window
    /// - `Conflict` for a code that already completed once
    /// - `Validation` for a code that was never issued
    pub async fn complete(
        &self,
        pairing_code: &str,
        device_public_key: &[u8; 32],
    ) -> Result<SyncBundle> {
        let now = time::now_timestamp();

        // Lookup-and-remove under one lock: exactly one caller wins
        let session = {
            let mut state = self.state.lock();

            if state.consumed.contains_key(pairing_code) {
                return Err(Error::Conflict("pairing code already consumed".into()));
            }

            let session = state
                .sessions
                .remove(pairing_code)
                .ok_or_else(|| Error::validation("pairing_code", "unknown pairing code"))?;

            if now > session.expires_at {
                // Expired codes are gone, not consumed
                return Err(Error::Expired {
                    expired_at: session.expires_at,
                });
            }

            state.consumed.insert(pairing_code.to_string(), now);
            session
        };

        let record = self
            .store
            .get_record(&session.identity_id)?
            .ok_or_else(|| Error::NotFound(format!("identity {}", session.identity_id)))?;

        let dh = session.host_keys.diffie_hellman(device_public_key);
        let sync_key = crypto::derive_sync_key(&dh, pairing_code)?;

        let plaintext = bincode::serialize(&record)?;
        let payload = self
            .crypto
            .encrypt(
                &sync_key,
                &plaintext,
                [0u8; crypto::SALT_SIZE],
                session.identity_id.as_bytes(),
            )
            .await?;

        self.events.record(
            SecurityEventKind::SyncCompleted,
            Some(session.identity_id.as_str()),
            format!("device {:?}", session.device.device_id),
        );
        tracing::info!(
            identity = %session.identity_id,
            device = %session.device.device_id,
            "pairing completed"
        );

        Ok(SyncBundle {
            identity_id: session.identity_id,
            host_public: session.host_keys.public_bytes(),
            payload,
        })
    }

    /// Drop expired sessions and aged consumed markers
    ///
    /// Idempotent; safe alongside foreground pairing.
    pub fn sweep_expired(&self) -> usize {
        let now = time::now_timestamp();
        let mut state = self.state.lock();

        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.expires_at >= now);
        let dropped = before - state.sessions.len();

        state
            .consumed
            .retain(|_, consumed_at| now - *consumed_at < CONSUMED_RETENTION_SECS);

        if dropped > 0 {
            tracing::debug!(dropped, "stale pairing sessions swept");
        }
        dropped
    }
}

/// Generate a pairing code like "XXXX-XXXX"
fn generate_pairing_code() -> String {
    let mut rng = rand::rngs::OsRng;
    let mut code = String::with_capacity(CODE_LEN + 1);
    for i in 0..CODE_LEN {
        if i == CODE_LEN / 2 {
            code.push('-');
        }
        let idx = rng.gen_range(0..CODE_ALPHABET.len());
        code.push(CODE_ALPHABET[idx] as char);
    }
    code
}

// ============================================================================
// TESTS
// ============================================================================
