//! # Collaborator Capabilities
//!
//! Interfaces to external collaborators. Nothing in this crate implements
//! delivery, telemetry ingestion, or hardware key custody; callers plug in
//! implementations at construction time.
//!
//! - [`NotificationChannel`] — delivers recovery/verification/alert
//!   messages to a contact (email and SMS are two implementations).
//! - [`SecurityTelemetrySink`] — accepts structured security events for
//!   an external SIEM.
//! - [`KeyCustodyBackend`] — optional HSM/enclave delegate; `CryptoCore`
//!   falls back to local software crypto when it is absent or reports
//!   itself unavailable.

use async_trait::async_trait;

use crate::crypto::{EncryptedBlob, EncryptionKey, Signature, SALT_SIZE};
use crate::error::Result;
use crate::events::SecurityEvent;

/// A contact channel for a custodian or claimant
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactChannel {
    /// Email address
    Email(String),
    /// Phone number (E.164)
    Phone(String),
}

/// Kinds of messages the core asks a channel to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// A recovery request needs this custodian's vote
    RecoveryApproval,
    /// A verification code or link
    Verification,
    /// A security alert (lockout, completed recovery)
    Alert,
}

/// Delivery capability for recovery and verification messages
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver a message to the given contact
    async fn send(
        &self,
        contact: &ContactChannel,
        kind: NotificationKind,
        body: &str,
    ) -> Result<()>;
}

/// Sink for structured security events (external SIEM)
#[async_trait]
pub trait SecurityTelemetrySink: Send + Sync {
    /// Accept one event; implementations decide batching/transport
    async fn accept(&self, event: &SecurityEvent) -> Result<()>;
}

/// Optional hardware-backed key custody
///
/// Implementations receive raw key material only inside the process
/// boundary; an enclave-backed implementation would substitute sealed key
/// handles behind the same signatures.
#[async_trait]
pub trait KeyCustodyBackend: Send + Sync {
    /// Whether the backend can currently serve requests
    async fn is_available(&self) -> bool;

    /// Sign a message with the given signing secret
    async fn sign(&self, signing_secret: &[u8; 32], message: &[u8]) -> Result<Signature>;

    /// Seal a payload into an encrypted blob
    async fn encrypt(
        &self,
        key: &EncryptionKey,
        plaintext: &[u8],
        salt: [u8; SALT_SIZE],
        aad: &[u8],
    ) -> Result<EncryptedBlob>;

    /// Open an encrypted blob, verifying integrity
    async fn decrypt(
        &self,
        key: &EncryptionKey,
        blob: &EncryptedBlob,
        aad: &[u8],
    ) -> Result<zeroize::Zeroizing<Vec<u8>>>;
}
