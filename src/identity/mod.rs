//! # Identity Module
//!
//! Identity creation, authentication, and holder-facing management.
//!
//! ## Identity Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         IDENTITY SYSTEM                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     IDENTITY RECORD                             │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  id        did:cstd:z…   hash of the original public key       │   │
//! │  │  handle    "alice"       unique, immutable mapping to id       │   │
//! │  │  keys      public keys + passcode-wrapped private keys         │   │
//! │  │  metadata  display name, contacts, preference flags            │   │
//! │  │  status    active | recovering | inactive                      │   │
//! │  │  security  failure counter, lockout, last-auth                 │   │
//! │  │  grants    tool id → scopes + expiry                           │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Creation flow:                                                        │
//! │                                                                         │
//! │  validate handle + passcode                                            │
//! │        │                                                               │
//! │        ▼                                                               │
//! │  generate Ed25519 + X25519 key pair                                    │
//! │        │                                                               │
//! │        ▼                                                               │
//! │  id = did:cstd:z(multihash(SHA-256(signing public key)))               │
//! │        │                                                               │
//! │        ▼                                                               │
//! │  wrap secret keys: AES-GCM(Argon2id(passcode, fresh salt))             │
//! │        │                                                               │
//! │        ▼                                                               │
//! │  persist record via SecureStore                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod did;
mod handle;
mod manager;
mod metadata;
mod record;

pub use did::{Did, DID_PREFIX};
pub use handle::{validate_handle, MAX_HANDLE_LENGTH, MIN_HANDLE_LENGTH};
pub use manager::{
    AuthPolicy, Challenge, IdentityManager, CHALLENGE_TTL_SECS, DEFAULT_LOCKOUT_SECS,
    DEFAULT_MAX_ATTEMPTS,
};
pub use metadata::{
    sanitize_text, IdentityMetadata, MetadataUpdate, Preferences, PrivacyLevel, SharingLevel,
    MAX_CONTACT_LENGTH, MAX_DISPLAY_NAME_LENGTH,
};
pub use record::{IdentityRecord, IdentityStatus, SecurityState, ToolGrant, RECORD_VERSION};
