//! # Key Derivation Functions
//!
//! Two derivation paths feed the rest of the crate:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY DERIVATION PATHS                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Passcode path (memory-hard, per holder)                               │
//! │  ───────────────────────────────────────                                │
//! │                                                                         │
//! │  Argon2id(                                                             │
//! │    password = passcode,                                                │
//! │    salt = 16 random bytes, fresh per blob,                             │
//! │    m_cost / t_cost / p_cost = KdfConfig                                │
//! │  ) → 32-byte wrapping key                                              │
//! │                                                                         │
//! │  Shared-secret path (fast, per session)                                │
//! │  ──────────────────────────────────────                                 │
//! │                                                                         │
//! │  HKDF-SHA256(                                                          │
//! │    ikm = X25519 DH output,                                             │
//! │    salt = pairing code,          ← binds key to one sync session      │
//! │    info = domain string                                                │
//! │  ) → 32-byte sync key                                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Aspect | Design Choice | Rationale |
//! |--------|---------------|-----------|
//! | Passcode KDF | Argon2id | Memory-hard, resists GPU/ASIC guessing |
//! | Session KDF | HKDF-SHA256 | Well-analyzed, recommended by NIST |
//! | Key Separation | Different `info` strings | Prevents key reuse across purposes |
//! | Version String | "-v1" suffix | Allows future algorithm upgrades |

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::crypto::encryption::{EncryptionKey, KEY_SIZE, SALT_SIZE};
use crate::error::{Error, Result};

/// Domain separation strings for HKDF
///
/// These ensure that keys derived for different purposes are
/// cryptographically independent.
pub mod domain {
    /// Domain for device-sync key derivation
    pub const DEVICE_SYNC: &[u8] = b"custodia-device-sync-v1";

    /// Domain for store-at-rest key derivation
    pub const STORE_ENCRYPTION: &[u8] = b"custodia-store-encryption-v1";

    /// Domain for recovery-key sealing
    pub const RECOVERY_KEY: &[u8] = b"custodia-recovery-key-v1";
}

/// Argon2id work-factor parameters
///
/// Defaults follow the interactive-login profile: 64 MiB memory,
/// 3 passes, single lane. Raise `m_cost_kib` for server-side use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfConfig {
    /// Memory cost in KiB
    pub m_cost_kib: u32,
    /// Number of passes
    pub t_cost: u32,
    /// Degree of parallelism
    pub p_cost: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            m_cost_kib: 64 * 1024,
            t_cost: 3,
            p_cost: 1,
        }
    }
}

/// Derive a symmetric wrapping key from a holder passcode
///
/// This is the slow path: Argon2id with the configured work factor. Call
/// it from a blocking context (the managers route through
/// `tokio::task::spawn_blocking`).
///
/// The salt must be freshly generated per blob via
/// [`crate::crypto::encryption::generate_salt`] and is recorded in the
/// resulting blob so the key can be re-derived later.
pub fn derive_passcode_key(
    passcode: &str,
    salt: &[u8; SALT_SIZE],
    config: &KdfConfig,
) -> Result<EncryptionKey> {
    let params = Params::new(config.m_cost_kib, config.t_cost, config.p_cost, Some(KEY_SIZE))
        .map_err(|e| Error::KeyDerivationFailed(format!("Invalid Argon2 params: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passcode.as_bytes(), salt, &mut key)
        .map_err(|e| Error::KeyDerivationFailed(format!("Argon2 hash failed: {}", e)))?;

    Ok(EncryptionKey::from_bytes(key))
}

/// Derive a sync key from an X25519 shared secret and pairing code
///
/// The pairing code is the HKDF salt, so the same device key pair paired
/// under a different code yields an unrelated sync key.
pub fn derive_sync_key(dh_output: &[u8; 32], pairing_code: &str) -> Result<EncryptionKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(pairing_code.as_bytes()), dh_output);

    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(domain::DEVICE_SYNC, &mut key)
        .map_err(|_| Error::KeyDerivationFailed("HKDF expansion failed".into()))?;

    Ok(EncryptionKey::from_bytes(key))
}

/// Derive a purpose-bound subkey from a root key
///
/// Used to split the store root key into independent keys for record
/// encryption and recovery-key sealing.
pub fn derive_subkey(root: &EncryptionKey, info: &[u8]) -> Result<EncryptionKey> {
    let hkdf = Hkdf::<Sha256>::new(None, root.as_inner());

    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut key)
        .map_err(|_| Error::KeyDerivationFailed("HKDF expansion failed".into()))?;

    Ok(EncryptionKey::from_bytes(key))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Small parameters so the test suite stays fast
    fn fast_config() -> KdfConfig {
        KdfConfig {
            m_cost_kib: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[test]
    fn test_passcode_key_deterministic() {
        let salt = [7u8; SALT_SIZE];

        let key1 = derive_passcode_key("Tr0ub4dor&3!XY", &salt, &fast_config()).unwrap();
        let key2 = derive_passcode_key("Tr0ub4dor&3!XY", &salt, &fast_config()).unwrap();

        assert_eq!(key1.as_inner(), key2.as_inner());
    }

    #[test]
    fn test_different_salts_different_keys() {
        let key1 = derive_passcode_key("Tr0ub4dor&3!XY", &[1u8; SALT_SIZE], &fast_config()).unwrap();
        let key2 = derive_passcode_key("Tr0ub4dor&3!XY", &[2u8; SALT_SIZE], &fast_config()).unwrap();

        assert_ne!(key1.as_inner(), key2.as_inner());
    }

    #[test]
    fn test_different_passcodes_different_keys() {
        let salt = [7u8; SALT_SIZE];

        let key1 = derive_passcode_key("Tr0ub4dor&3!XY", &salt, &fast_config()).unwrap();
        let key2 = derive_passcode_key("N3wP@ssphrase9", &salt, &fast_config()).unwrap();

        assert_ne!(key1.as_inner(), key2.as_inner());
    }

    #[test]
    fn test_sync_key_binds_to_pairing_code() {
        let dh = [42u8; 32];

        let key1 = derive_sync_key(&dh, "ABCD-1234").unwrap();
        let key2 = derive_sync_key(&dh, "WXYZ-5678").unwrap();

        assert_ne!(key1.as_inner(), key2.as_inner());
    }

    #[test]
    fn test_subkeys_are_independent() {
        let root = EncryptionKey::from_bytes([9u8; KEY_SIZE]);

        let store = derive_subkey(&root, domain::STORE_ENCRYPTION).unwrap();
        let recovery = derive_subkey(&root, domain::RECOVERY_KEY).unwrap();

        assert_ne!(store.as_inner(), recovery.as_inner());
        assert_ne!(store.as_inner(), root.as_inner());
    }
}
