//! # Cryptography Module
//!
//! This module provides all cryptographic primitives used by Custodia Core.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    KEY HIERARCHY                                │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  Holder Passcode                                                │   │
//! │  │         │                                                       │   │
//! │  │         ▼                                                       │   │
//! │  │  ┌─────────────────────────────────────────────────────────┐   │   │
//! │  │  │         Wrapping Key (Argon2id, fresh salt per blob)    │   │   │
//! │  │  └─────────────────────────────────────────────────────────┘   │   │
//! │  │         │ wraps                                                 │   │
//! │  │         ▼                                                       │   │
//! │  │  ┌─────────────────┐         ┌─────────────────┐              │   │
//! │  │  │  Signing Key    │         │ Agreement Key   │              │   │
//! │  │  │  (Ed25519)      │         │ (X25519)        │              │   │
//! │  │  │                 │         │                 │              │   │
//! │  │  │ • Challenges    │         │ • Device sync   │              │   │
//! │  │  │ • QR envelopes  │         │ • Sync bundles  │              │   │
//! │  │  │ • DID derive    │         │                 │              │   │
//! │  │  └─────────────────┘         └─────────────────┘              │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 ENCRYPTION SCHEME                               │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  At-rest sealing (AES-256-GCM)                                 │   │
//! │  │  ─────────────────────────────                                  │   │
//! │  │                                                                 │   │
//! │  │  • 256-bit key (Argon2id or HKDF derived)                      │   │
//! │  │  • 96-bit nonce (random per blob)                              │   │
//! │  │  • 128-bit authentication tag                                  │   │
//! │  │  • SHA-256 plaintext checksum, verified fail-closed            │   │
//! │  │                                                                 │   │
//! │  │  Blob = { version, nonce, salt, checksum, ciphertext }         │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices & Rationale
//!
//! | Algorithm | Purpose | Why Chosen |
//! |-----------|---------|------------|
//! | Ed25519 | Signing | Fast, small keys, widely audited |
//! | X25519 | Key Exchange | Fast ECDH, same curve as Ed25519 |
//! | AES-256-GCM | Encryption | Hardware acceleration, AEAD |
//! | Argon2id | Passcode KDF | Memory-hard, guessing-resistant |
//! | HKDF-SHA256 | Session KDF | Industry standard, well-analyzed |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: All secret keys are zeroized when dropped
//! 2. **Constant-Time Operations**: dalek for curve math, `subtle` for
//!    checksum comparison
//! 3. **Secure Random**: `rand::rngs::OsRng` for all nonces, salts, codes
//! 4. **No Key Reuse**: Fresh salt and nonce for every blob

mod core;
mod encryption;
mod kdf;
mod keys;
mod passcode;
mod signing;

pub use core::CryptoCore;
pub use encryption::{
    decrypt, encrypt, generate_salt, EncryptedBlob, EncryptionKey, BLOB_VERSION, KEY_SIZE,
    NONCE_SIZE, SALT_SIZE,
};
pub use kdf::{derive_passcode_key, derive_subkey, derive_sync_key, domain, KdfConfig};
pub use keys::{AgreementKeyPair, KeyPair, PublicKey, SigningKeyPair, KEYPAIR_SECRET_SIZE};
pub(crate) use keys::hex_bytes;
pub use passcode::{validate_passcode_strength, PasscodeStrength, MIN_PASSCODE_LENGTH};
pub use signing::{sign, verify, Signature, SIGNATURE_SIZE};
