//! # Key Management
//!
//! This module handles cryptographic key generation and management.
//!
//! ## Key Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY TYPES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SigningKeyPair (Ed25519)                                       │   │
//! │  │  ─────────────────────────                                       │   │
//! │  │                                                                  │   │
//! │  │  Purpose:                                                       │   │
//! │  │  • Proving identity (challenge/response authentication)        │   │
//! │  │  • Signing QR envelopes (invitations, recovery requests)       │   │
//! │  │  • Deriving the content-addressed identifier                    │   │
//! │  │                                                                  │   │
//! │  │  Format:                                                        │   │
//! │  │  • Private key: 32 bytes (never stored in cleartext)           │   │
//! │  │  • Public key: 32 bytes (shared freely)                        │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  AgreementKeyPair (X25519)                                      │   │
//! │  │  ─────────────────────────                                       │   │
//! │  │                                                                  │   │
//! │  │  Purpose:                                                       │   │
//! │  │  • Key exchange with pairing devices (ECDH)                     │   │
//! │  │  • Deriving sync keys for device-sync bundles                   │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  KeyPair (Combined)                                             │   │
//! │  │  ────────────────────                                            │   │
//! │  │                                                                  │   │
//! │  │  Signing + agreement keypairs for one identity. The secret      │   │
//! │  │  halves round-trip through a passcode-wrapped EncryptedBlob     │   │
//! │  │  via secret_bytes() / from_secret_bytes().                      │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroizing, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of the combined secret material produced by [`KeyPair::secret_bytes`]
pub const KEYPAIR_SECRET_SIZE: usize = 64;

/// Combined keypair containing both signing and agreement keys
///
/// ## Security
///
/// - Private keys are zeroized when this struct is dropped
/// - Public keys can be safely shared with anyone
/// - At rest the secret halves only ever exist inside an `EncryptedBlob`
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    /// Ed25519 keypair for signing
    pub signing: SigningKeyPair,
    /// X25519 keypair for key agreement
    pub agreement: AgreementKeyPair,
}

impl KeyPair {
    /// Generate a new random keypair
    ///
    /// Uses the operating system's secure random number generator.
    pub fn generate() -> Self {
        Self {
            signing: SigningKeyPair::generate(),
            agreement: AgreementKeyPair::generate(),
        }
    }

    /// Get the public keys for sharing with others
    pub fn public_keys(&self) -> PublicKey {
        PublicKey {
            signing: self.signing.public_bytes(),
            agreement: self.agreement.public_bytes(),
        }
    }

    /// Serialize the secret halves for wrapping
    ///
    /// Layout: signing secret (32 bytes) followed by agreement secret
    /// (32 bytes). The returned buffer is zeroized on drop; it must only
    /// ever be fed into an authenticated encryption step.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEYPAIR_SECRET_SIZE]> {
        let mut combined = Zeroizing::new([0u8; KEYPAIR_SECRET_SIZE]);
        combined[..32].copy_from_slice(&self.signing.secret_bytes());
        combined[32..].copy_from_slice(&self.agreement.secret_bytes());
        combined
    }

    /// Reconstruct a keypair from wrapped secret bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEYPAIR_SECRET_SIZE {
            return Err(Error::InvalidKey(format!(
                "Key material must be {} bytes, got {}",
                KEYPAIR_SECRET_SIZE,
                bytes.len()
            )));
        }

        let signing_bytes: [u8; 32] = bytes[..32]
            .try_into()
            .map_err(|_| Error::InvalidKey("Invalid signing key length".into()))?;
        let agreement_bytes: [u8; 32] = bytes[32..]
            .try_into()
            .map_err(|_| Error::InvalidKey("Invalid agreement key length".into()))?;

        Ok(Self {
            signing: SigningKeyPair::from_bytes(&signing_bytes),
            agreement: AgreementKeyPair::from_bytes(&agreement_bytes),
        })
    }
}

/// Ed25519 signing keypair
#[derive(ZeroizeOnDrop)]
pub struct SigningKeyPair {
    /// Private signing key (secret)
    #[zeroize(skip)] // ed25519_dalek::SigningKey handles its own zeroization
    secret: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new random signing keypair
    pub fn generate() -> Self {
        let secret = SigningKey::generate(&mut OsRng);
        Self { secret }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let secret = SigningKey::from_bytes(bytes);
        Self { secret }
    }

    /// Get the secret key bytes (for wrapping only)
    ///
    /// ## Security Warning
    ///
    /// Only use this on the path into an `EncryptedBlob`. Never log or
    /// transmit these bytes.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.secret.verifying_key().to_bytes()
    }

    /// Get the verifying key for signature verification
    pub fn verifying_key(&self) -> VerifyingKey {
        self.secret.verifying_key()
    }

    /// Get reference to the signing key
    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.secret
    }
}

/// X25519 agreement keypair for key exchange
#[derive(ZeroizeOnDrop)]
pub struct AgreementKeyPair {
    /// Private agreement key (secret)
    #[zeroize(skip)] // x25519_dalek handles its own zeroization
    secret: StaticSecret,
    /// Public agreement key (derived from secret)
    public: X25519PublicKey,
}

impl AgreementKeyPair {
    /// Generate a new random agreement keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the secret key bytes (for wrapping only)
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Perform Diffie-Hellman key exchange
    ///
    /// Returns a shared secret that both parties can compute:
    /// - Host: host_secret × device_public
    /// - Device: device_secret × host_public
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let their_public = X25519PublicKey::from(*their_public);
        self.secret.diffie_hellman(&their_public).to_bytes()
    }
}

/// Public keys that can be safely shared with others
///
/// This contains only public information and can be serialized,
/// transmitted, and stored without security concerns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKey {
    /// Ed25519 public key for signature verification (32 bytes)
    #[serde(with = "hex_bytes")]
    pub signing: [u8; 32],

    /// X25519 public key for key agreement (32 bytes)
    #[serde(with = "hex_bytes")]
    pub agreement: [u8; 32],
}

impl PublicKey {
    /// Create a PublicKey from raw bytes
    pub fn from_bytes(signing: [u8; 32], agreement: [u8; 32]) -> Self {
        Self { signing, agreement }
    }

    /// Get the verifying key for signature verification
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.signing)
            .map_err(|e| Error::InvalidKey(format!("Invalid signing public key: {}", e)))
    }
}

/// Serde helper for serializing byte arrays as hex
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("Invalid length"))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();

        // Keys should be different
        assert_ne!(kp1.signing.public_bytes(), kp2.signing.public_bytes());
        assert_ne!(kp1.agreement.public_bytes(), kp2.agreement.public_bytes());
    }

    #[test]
    fn test_secret_bytes_round_trip() {
        let kp = KeyPair::generate();

        let secret = kp.secret_bytes();
        let restored = KeyPair::from_secret_bytes(&*secret).unwrap();

        assert_eq!(kp.signing.public_bytes(), restored.signing.public_bytes());
        assert_eq!(kp.agreement.public_bytes(), restored.agreement.public_bytes());
    }

    #[test]
    fn test_from_secret_bytes_wrong_length() {
        let result = KeyPair::from_secret_bytes(&[0u8; 31]);
        assert!(result.is_err());
    }

    #[test]
    fn test_diffie_hellman() {
        let host = AgreementKeyPair::generate();
        let device = AgreementKeyPair::generate();

        // Both parties should derive the same shared secret
        let host_shared = host.diffie_hellman(&device.public_bytes());
        let device_shared = device.diffie_hellman(&host.public_bytes());

        assert_eq!(host_shared, device_shared);
    }

    #[test]
    fn test_public_key_serialization() {
        let kp = KeyPair::generate();
        let public = kp.public_keys();

        let json = serde_json::to_string(&public).unwrap();
        let restored: PublicKey = serde_json::from_str(&json).unwrap();

        assert_eq!(public, restored);
    }
}
