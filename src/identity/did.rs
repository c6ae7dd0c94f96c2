//! # Decentralized Identifiers (DIDs)
//!
//! Content-addressed identifiers for Custodia identities.
//!
//! ## Identifier Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DID FORMAT                                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Example: did:cstd:zQmYHN5fjE7Xy...                                    │
//! │                                                                         │
//! │  ┌─────────┬─────────┬───────────────────────────────────────────┐     │
//! │  │ Scheme  │ Method  │           Method-specific ID              │     │
//! │  ├─────────┼─────────┼───────────────────────────────────────────┤     │
//! │  │  did    │  cstd   │  z + base58btc(multihash)                 │     │
//! │  └─────────┴─────────┴───────────────────────────────────────────┘     │
//! │                                                                         │
//! │  Method-specific ID breakdown:                                         │
//! │  ┌─────────┬──────────────────────────────────────────────────────┐    │
//! │  │   z     │  Base58btc encoding indicator (multibase)            │    │
//! │  ├─────────┼──────────────────────────────────────────────────────┤    │
//! │  │  0x12   │  SHA2-256 multihash code                             │    │
//! │  ├─────────┼──────────────────────────────────────────────────────┤    │
//! │  │  0x20   │  Digest length (32 bytes)                            │    │
//! │  ├─────────┼──────────────────────────────────────────────────────┤    │
//! │  │  ...    │  SHA-256 digest of the Ed25519 public key            │    │
//! │  └─────────┴──────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The identifier is the *hash* of the public key rather than the key
//! itself, so it stays stable across key rotation: a recovered identity
//! keeps the id minted from its original key while the current key
//! material changes. Identifiers are never reused.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// The DID method prefix
pub const DID_PREFIX: &str = "did:cstd:";

/// Multihash header for a SHA2-256 digest (code 0x12, length 0x20)
const SHA256_MULTIHASH_PREFIX: [u8; 2] = [0x12, 0x20];

/// A content-addressed decentralized identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Did {
    /// The full DID string (e.g., "did:cstd:zQmY...")
    value: String,
}

impl Did {
    /// Derive a DID from an Ed25519 public key
    ///
    /// ## Process
    ///
    /// 1. SHA-256 the public key
    /// 2. Prepend the SHA2-256 multihash header (0x12 0x20)
    /// 3. Encode with base58btc, prepend "z" (multibase)
    /// 4. Prepend "did:cstd:"
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest: [u8; 32] = Sha256::digest(public_key).into();

        let mut multihash = Vec::with_capacity(34);
        multihash.extend_from_slice(&SHA256_MULTIHASH_PREFIX);
        multihash.extend_from_slice(&digest);

        let encoded = format!("z{}", bs58::encode(&multihash).into_string());
        let value = format!("{}{}", DID_PREFIX, encoded);

        Self { value }
    }

    /// Parse a DID string
    ///
    /// ## Validation
    ///
    /// - Must start with "did:cstd:"
    /// - Must be valid base58btc with the "z" multibase prefix
    /// - Decoded bytes must carry the SHA2-256 multihash header and a
    ///   32-byte digest
    pub fn parse(did_string: &str) -> Result<Self> {
        if !did_string.starts_with(DID_PREFIX) {
            return Err(Error::validation(
                "did",
                format!("must start with '{}', got '{}'", DID_PREFIX, did_string),
            ));
        }

        let identifier = &did_string[DID_PREFIX.len()..];

        if !identifier.starts_with('z') {
            return Err(Error::validation(
                "did",
                "identifier must start with 'z' (base58btc)",
            ));
        }

        let decoded = bs58::decode(&identifier[1..])
            .into_vec()
            .map_err(|e| Error::validation("did", format!("invalid base58btc encoding: {}", e)))?;

        if decoded.len() != 34 {
            return Err(Error::validation(
                "did",
                format!(
                    "invalid multihash length: expected 34 bytes (2 header + 32 digest), got {}",
                    decoded.len()
                ),
            ));
        }

        if decoded[0..2] != SHA256_MULTIHASH_PREFIX {
            return Err(Error::validation(
                "did",
                format!(
                    "invalid multihash header: expected SHA2-256 (0x1220), got {:02x}{:02x}",
                    decoded[0], decoded[1]
                ),
            ));
        }

        Ok(Self {
            value: did_string.to_string(),
        })
    }

    /// Check whether this DID was derived from the given public key
    pub fn matches_public_key(&self, public_key: &[u8; 32]) -> bool {
        Self::from_public_key(public_key) == *self
    }

    /// Get the full DID string
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl std::str::FromStr for Did {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_did_from_public_key() {
        let public_key = [0u8; 32];
        let did = Did::from_public_key(&public_key);

        assert!(did.as_str().starts_with("did:cstd:z"));
    }

    #[test]
    fn test_did_roundtrip() {
        let public_key = [42u8; 32];
        let did = Did::from_public_key(&public_key);

        let parsed = Did::parse(did.as_str()).unwrap();
        assert_eq!(did, parsed);
        assert!(parsed.matches_public_key(&public_key));
    }

    #[test]
    fn test_did_does_not_match_other_key() {
        let did = Did::from_public_key(&[42u8; 32]);
        assert!(!did.matches_public_key(&[43u8; 32]));
    }

    #[test]
    fn test_did_parse_invalid_prefix() {
        let result = Did::parse("did:web:example.com");
        assert!(result.is_err());
    }

    #[test]
    fn test_did_parse_invalid_multibase() {
        // Missing 'z' prefix
        let result = Did::parse("did:cstd:QmYHN5fjE7Xy");
        assert!(result.is_err());
    }

    #[test]
    fn test_did_deterministic() {
        let public_key = [42u8; 32];

        let did1 = Did::from_public_key(&public_key);
        let did2 = Did::from_public_key(&public_key);

        assert_eq!(did1, did2);
    }

    #[test]
    fn test_different_keys_different_dids() {
        let did1 = Did::from_public_key(&[1u8; 32]);
        let did2 = Did::from_public_key(&[2u8; 32]);

        assert_ne!(did1, did2);
    }
}
