//! # Encryption Module
//!
//! Provides AES-256-GCM authenticated encryption for everything sensitive
//! at rest: wrapped private keys, recovery keys, custodian lists, identity
//! records.
//!
//! ## Blob Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ENCRYPTED BLOB                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  version     u16        format version for future upgrades  │       │
//! │  │  nonce       12 bytes   random per encryption, never reused │       │
//! │  │  salt        16 bytes   KDF salt the key was derived with   │       │
//! │  │  checksum    32 bytes   SHA-256 over the plaintext          │       │
//! │  │  ciphertext  variable   AES-256-GCM output incl. auth tag   │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  Decryption order:                                                     │
//! │                                                                         │
//! │  1. Version check                                                      │
//! │  2. AES-GCM open (tag mismatch → Integrity, no partial output)        │
//! │  3. Constant-time checksum compare (mismatch → Integrity)             │
//! │                                                                         │
//! │  A blob that fails either check is treated as tampered or corrupted.   │
//! │  There is no repair path and no warning-level downgrade.               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Confidentiality | Only a holder of the key can read the plaintext |
//! | Integrity | Any modification is detected before plaintext is released |
//! | Binding | AAD ties a blob to its storage context (record id, purpose) |

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroizing, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the KDF salt carried in a blob (128 bits)
pub const SALT_SIZE: usize = 16;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Current blob format version
pub const BLOB_VERSION: u16 = 1;

/// An AES-256-GCM encryption key
///
/// Zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes (for key derivation chains)
    pub(crate) fn as_inner(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// The at-rest representation of any sensitive payload
///
/// Carries everything needed to verify and decrypt: the AEAD nonce, the
/// KDF salt its key was derived with, a format version, and an integrity
/// checksum over the plaintext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Format version
    pub version: u16,
    /// AES-GCM nonce, random per encryption
    pub nonce: [u8; NONCE_SIZE],
    /// Salt the encryption key was derived with (all zeros for non-derived keys)
    pub salt: [u8; SALT_SIZE],
    /// SHA-256 over the plaintext, verified on every decrypt
    pub checksum: [u8; 32],
    /// Ciphertext including the 16-byte authentication tag
    pub ciphertext: Vec<u8>,
}

/// Generate a random KDF salt
///
/// A fresh salt is generated per blob and never reused.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Encrypt a payload into an [`EncryptedBlob`]
///
/// ## Parameters
///
/// - `key`: 256-bit encryption key
/// - `plaintext`: Payload to encrypt
/// - `salt`: The KDF salt the key was derived with (recorded in the blob
///   so the key can be re-derived at decrypt time)
/// - `aad`: Additional authenticated data binding the blob to its context
pub fn encrypt(
    key: &EncryptionKey,
    plaintext: &[u8],
    salt: [u8; SALT_SIZE],
    aad: &[u8],
) -> Result<EncryptedBlob> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce), payload)
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    let checksum: [u8; 32] = Sha256::digest(plaintext).into();

    Ok(EncryptedBlob {
        version: BLOB_VERSION,
        nonce,
        salt,
        checksum,
        ciphertext,
    })
}

/// Decrypt an [`EncryptedBlob`], verifying integrity before returning
///
/// ## Errors
///
/// Returns `Integrity` if:
/// - The authentication tag does not verify (wrong key, tampered data,
///   mismatched AAD)
/// - The plaintext checksum does not match
///
/// Either way no plaintext is released. The returned buffer is zeroized
/// when dropped.
pub fn decrypt(key: &EncryptionKey, blob: &EncryptedBlob, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if blob.version != BLOB_VERSION {
        return Err(Error::Integrity(format!(
            "Unsupported blob version {}",
            blob.version
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: blob.ciphertext.as_slice(),
        aad,
    };

    let plaintext = cipher
        .decrypt(AesNonce::from_slice(&blob.nonce), payload)
        .map_err(|_| Error::Integrity("authentication tag mismatch".into()))?;
    let plaintext = Zeroizing::new(plaintext);

    let checksum: [u8; 32] = Sha256::digest(plaintext.as_slice()).into();
    if !bool::from(checksum.ct_eq(&blob.checksum)) {
        return Err(Error::Integrity("plaintext checksum mismatch".into()));
    }

    Ok(plaintext)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(byte: u8) -> EncryptionKey {
        EncryptionKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = test_key(42);
        let plaintext = b"wrapped private key material";
        let aad = b"identity:did:cstd:ztest";

        let blob = encrypt(&key, plaintext, generate_salt(), aad).unwrap();
        let decrypted = decrypt(&key, &blob, aad).unwrap();

        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let key = test_key(42);

        let blob = encrypt(&key, b"", [0u8; SALT_SIZE], b"").unwrap();
        let decrypted = decrypt(&key, &blob, b"").unwrap();

        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_wrong_key_fails_integrity() {
        let blob = encrypt(&test_key(42), b"secret", generate_salt(), b"ctx").unwrap();

        let result = decrypt(&test_key(99), &blob, b"ctx");
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key(42);
        let mut blob = encrypt(&key, b"secret", generate_salt(), b"ctx").unwrap();

        blob.ciphertext[0] ^= 0xFF;

        let result = decrypt(&key, &blob, b"ctx");
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn test_tampered_checksum_fails() {
        let key = test_key(42);
        let mut blob = encrypt(&key, b"secret", generate_salt(), b"ctx").unwrap();

        blob.checksum[0] ^= 0xFF;

        let result = decrypt(&key, &blob, b"ctx");
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key(42);
        let blob = encrypt(&key, b"secret", generate_salt(), b"ctx").unwrap();

        let result = decrypt(&key, &blob, b"other ctx");
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn test_unsupported_version_fails() {
        let key = test_key(42);
        let mut blob = encrypt(&key, b"secret", generate_salt(), b"ctx").unwrap();

        blob.version = 99;

        let result = decrypt(&key, &blob, b"ctx");
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn test_different_nonces_produce_different_ciphertext() {
        let key = test_key(42);
        let salt = generate_salt();

        let blob1 = encrypt(&key, b"secret", salt, b"ctx").unwrap();
        let blob2 = encrypt(&key, b"secret", salt, b"ctx").unwrap();

        // Random nonces should produce different ciphertexts
        assert_ne!(blob1.ciphertext, blob2.ciphertext);
        assert_ne!(blob1.nonce, blob2.nonce);
    }

    #[test]
    fn test_blob_serialization() {
        let key = test_key(42);
        let blob = encrypt(&key, b"secret", generate_salt(), b"ctx").unwrap();

        let bytes = bincode::serialize(&blob).unwrap();
        let restored: EncryptedBlob = bincode::deserialize(&bytes).unwrap();

        assert_eq!(blob, restored);
        assert_eq!(decrypt(&key, &restored, b"ctx").unwrap().as_slice(), b"secret");
    }
}
