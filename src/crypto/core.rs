//! # CryptoCore
//!
//! One constructed-at-startup instance bundling the crate's cryptographic
//! configuration: the Argon2id work factor and an optional external key
//! custody backend (HSM / enclave).
//!
//! When a backend is configured and reports itself available, sign,
//! encrypt, and decrypt are delegated to it; otherwise the local software
//! implementations run. Key derivation always runs locally, on the tokio
//! blocking pool so it never stalls the async runtime.

use std::sync::Arc;

use crate::capability::KeyCustodyBackend;
use crate::crypto::encryption::{self, EncryptedBlob, EncryptionKey, SALT_SIZE};
use crate::crypto::kdf::{self, KdfConfig};
use crate::crypto::keys::{KeyPair, SigningKeyPair};
use crate::crypto::signing::{self, Signature};
use crate::error::{Error, Result};

/// Cryptographic service instance
///
/// Cheap to clone behind an `Arc`; every manager receives a reference at
/// construction time.
pub struct CryptoCore {
    kdf_config: KdfConfig,
    custody: Option<Arc<dyn KeyCustodyBackend>>,
}

impl CryptoCore {
    /// Create a crypto core with the given KDF work factor
    pub fn new(kdf_config: KdfConfig) -> Self {
        Self {
            kdf_config,
            custody: None,
        }
    }

    /// Attach an external key custody backend
    pub fn with_custody_backend(mut self, backend: Arc<dyn KeyCustodyBackend>) -> Self {
        self.custody = Some(backend);
        self
    }

    /// The configured KDF work factor
    pub fn kdf_config(&self) -> &KdfConfig {
        &self.kdf_config
    }

    /// Generate a fresh identity key pair
    pub fn generate_key_pair(&self) -> KeyPair {
        KeyPair::generate()
    }

    /// Derive a wrapping key from a passcode
    ///
    /// Runs Argon2id on the blocking pool; awaiting this never blocks
    /// other identities' operations.
    pub async fn derive_passcode_key(
        &self,
        passcode: &str,
        salt: [u8; SALT_SIZE],
    ) -> Result<EncryptionKey> {
        let passcode = passcode.to_string();
        let config = self.kdf_config;

        tokio::task::spawn_blocking(move || kdf::derive_passcode_key(&passcode, &salt, &config))
            .await
            .map_err(|e| Error::Internal(format!("KDF task failed: {}", e)))?
    }

    /// Encrypt a payload, delegating to the custody backend when available
    pub async fn encrypt(
        &self,
        key: &EncryptionKey,
        plaintext: &[u8],
        salt: [u8; SALT_SIZE],
        aad: &[u8],
    ) -> Result<EncryptedBlob> {
        if let Some(backend) = self.available_backend().await {
            return backend.encrypt(key, plaintext, salt, aad).await;
        }
        encryption::encrypt(key, plaintext, salt, aad)
    }

    /// Decrypt a blob, delegating to the custody backend when available
    ///
    /// Integrity failures are returned as-is from either path; they are
    /// never retried against the other implementation.
    pub async fn decrypt(
        &self,
        key: &EncryptionKey,
        blob: &EncryptedBlob,
        aad: &[u8],
    ) -> Result<zeroize::Zeroizing<Vec<u8>>> {
        if let Some(backend) = self.available_backend().await {
            return backend.decrypt(key, blob, aad).await;
        }
        encryption::decrypt(key, blob, aad)
    }

    /// Sign a message, delegating to the custody backend when available
    pub async fn sign(&self, keypair: &SigningKeyPair, message: &[u8]) -> Result<Signature> {
        if let Some(backend) = self.available_backend().await {
            return backend.sign(&keypair.secret_bytes(), message).await;
        }
        Ok(signing::sign(keypair, message))
    }

    /// Verify a signature (always local; verification needs no custody)
    pub fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &Signature) -> Result<()> {
        signing::verify(public_key, message, signature)
    }

    async fn available_backend(&self) -> Option<&Arc<dyn KeyCustodyBackend>> {
        if let Some(backend) = &self.custody {
            if backend.is_available().await {
                return Some(backend);
            }
        }
        None
    }
}

impl Default for CryptoCore {
    fn default() -> Self {
        Self::new(KdfConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encryption::generate_salt;

    fn fast_core() -> CryptoCore {
        CryptoCore::new(KdfConfig {
            m_cost_kib: 8,
            t_cost: 1,
            p_cost: 1,
        })
    }

    #[tokio::test]
    async fn test_passcode_round_trip_through_core() {
        let core = fast_core();
        let salt = generate_salt();

        let key = core.derive_passcode_key("Tr0ub4dor&3!XY", salt).await.unwrap();
        let blob = core.encrypt(&key, b"key material", salt, b"ctx").await.unwrap();

        let key_again = core.derive_passcode_key("Tr0ub4dor&3!XY", salt).await.unwrap();
        let plaintext = core.decrypt(&key_again, &blob, b"ctx").await.unwrap();

        assert_eq!(plaintext.as_slice(), b"key material");
    }

    #[tokio::test]
    async fn test_wrong_passcode_is_integrity_failure() {
        let core = fast_core();
        let salt = generate_salt();

        let key = core.derive_passcode_key("Tr0ub4dor&3!XY", salt).await.unwrap();
        let blob = core.encrypt(&key, b"key material", salt, b"ctx").await.unwrap();

        let wrong = core.derive_passcode_key("N3wP@ssphrase9", salt).await.unwrap();
        let result = core.decrypt(&wrong, &blob, b"ctx").await;

        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[tokio::test]
    async fn test_sign_verify_through_core() {
        let core = fast_core();
        let keypair = SigningKeyPair::generate();

        let signature = core.sign(&keypair, b"challenge").await.unwrap();
        assert!(core.verify(&keypair.public_bytes(), b"challenge", &signature).is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_backend_falls_back_to_local() {
        use async_trait::async_trait;

        /// A backend that is never reachable; every call would fail
        struct DeadBackend;

        #[async_trait]
        impl KeyCustodyBackend for DeadBackend {
            async fn is_available(&self) -> bool {
                false
            }

            async fn sign(&self, _secret: &[u8; 32], _message: &[u8]) -> Result<Signature> {
                Err(Error::CustodyUnavailable("offline".into()))
            }

            async fn encrypt(
                &self,
                _key: &EncryptionKey,
                _plaintext: &[u8],
                _salt: [u8; SALT_SIZE],
                _aad: &[u8],
            ) -> Result<EncryptedBlob> {
                Err(Error::CustodyUnavailable("offline".into()))
            }

            async fn decrypt(
                &self,
                _key: &EncryptionKey,
                _blob: &EncryptedBlob,
                _aad: &[u8],
            ) -> Result<zeroize::Zeroizing<Vec<u8>>> {
                Err(Error::CustodyUnavailable("offline".into()))
            }
        }

        let core = fast_core().with_custody_backend(Arc::new(DeadBackend));
        let keypair = SigningKeyPair::generate();

        // Local software crypto serves every operation
        let signature = core.sign(&keypair, b"challenge").await.unwrap();
        assert!(core.verify(&keypair.public_bytes(), b"challenge", &signature).is_ok());

        let salt = generate_salt();
        let key = core.derive_passcode_key("Tr0ub4dor&3!XY", salt).await.unwrap();
        let blob = core.encrypt(&key, b"payload", salt, b"ctx").await.unwrap();
        assert_eq!(core.decrypt(&key, &blob, b"ctx").await.unwrap().as_slice(), b"payload");
    }
}
