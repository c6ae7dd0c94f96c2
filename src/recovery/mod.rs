//! # Recovery Module
//!
//! Custodian enrollment and threshold-based recovery.
//!
//! ## Threshold Recovery
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     THRESHOLD RECOVERY FLOW                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Holder enrolls 2-5 custodians, each holding one vote.                 │
//! │                                                                         │
//! │  ┌───────────┐   invite    ┌───────────┐   accept    ┌───────────┐    │
//! │  │  pending  │ ──────────► │  pending  │ ──────────► │  active   │    │
//! │  └───────────┘             └───────────┘             └───────────┘    │
//! │                                                                         │
//! │  RecoveryConfig.is_ready ⇔ active custodians ≥ threshold (≥ 2)         │
//! │                                                                         │
//! │  Claimant initiates recovery:                                          │
//! │                                                                         │
//! │  ┌─────────┐  approvals ≥ T        ┌──────────┐                        │
//! │  │         │ ────────────────────► │ approved │──► key rotation        │
//! │  │ pending │  denials > N − T      ├──────────┤                        │
//! │  │         │ ────────────────────► │  denied  │                        │
//! │  │         │  now > expires_at     ├──────────┤                        │
//! │  │         │ ────────────────────► │ expired  │                        │
//! │  └─────────┘                       └──────────┘                        │
//! │                                                                         │
//! │  • Votes are idempotent per custodian: a re-vote overwrites.           │
//! │  • Approval is evaluated before denial; if both thresholds cross in    │
//! │    one evaluation the request resolves approved.                       │
//! │  • Expiry is a predicate checked lazily on read; it overrides pending  │
//! │    but never an already-terminal approved/denied.                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod manager;

pub use manager::{CustodianSpec, RecoveryManager, INVITATION_TTL_SECS, RECOVERY_WINDOW_SECS};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::capability::ContactChannel;
use crate::crypto::EncryptedBlob;

/// Minimum custodians once recovery is configured
pub const MIN_CUSTODIANS: usize = 2;

/// Maximum custodians per identity
pub const MAX_CUSTODIANS: usize = 5;

/// What kind of party a custodian is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustodianKind {
    /// A trusted person
    Person,
    /// A custody service
    Service,
    /// The holder themselves (second device, safe-deposit key)
    #[serde(rename = "self")]
    SelfHeld,
}

/// How much authority weight the holder assigns a custodian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Casual contact
    Low,
    /// Known and trusted
    Medium,
    /// Deeply trusted (family, legal)
    High,
}

/// Enrollment status of a custodian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustodianStatus {
    /// Enrolled but invitation not yet accepted
    Pending,
    /// Accepted; counts toward readiness and may vote
    Active,
    /// Deactivated
    Inactive,
}

/// A party entrusted with one share of recovery authority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Custodian {
    /// Custodian id (UUID)
    pub id: String,
    /// Display name
    pub name: String,
    /// What kind of party this is
    pub kind: CustodianKind,
    /// Where to reach them
    pub contact: ContactChannel,
    /// Their Ed25519 public key (verifies votes)
    #[serde(with = "crate::crypto::hex_bytes")]
    pub public_key: [u8; 32],
    /// Assigned trust level
    pub trust: TrustLevel,
    /// Enrollment status
    pub status: CustodianStatus,
    /// When enrolled (Unix seconds)
    pub enrolled_at: i64,
}

/// Per-identity recovery configuration
///
/// Created when the first custodian is enrolled; readiness is recomputed
/// on every custodian change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Approvals required to authorize recovery
    pub threshold: u32,
    /// Enrolled custodians, at most [`MAX_CUSTODIANS`]
    pub custodians: Vec<Custodian>,
    /// Sealed recovery key, rotated on completed recovery
    pub recovery_key: EncryptedBlob,
    /// True iff enough active custodians exist to meet the threshold
    pub is_ready: bool,
}

impl RecoveryConfig {
    /// Number of custodians counting toward the threshold
    pub fn active_custodians(&self) -> usize {
        self.custodians
            .iter()
            .filter(|c| c.status == CustodianStatus::Active)
            .count()
    }

    /// Recompute `is_ready` after any custodian or threshold change
    pub fn recompute_ready(&mut self) {
        self.is_ready = self.threshold as usize >= MIN_CUSTODIANS
            && self.active_custodians() >= self.threshold as usize;
    }

    /// Find a custodian by id
    pub fn custodian(&self, custodian_id: &str) -> Option<&Custodian> {
        self.custodians.iter().find(|c| c.id == custodian_id)
    }

    /// Find a custodian by id, mutably
    pub fn custodian_mut(&mut self, custodian_id: &str) -> Option<&mut Custodian> {
        self.custodians.iter_mut().find(|c| c.id == custodian_id)
    }
}

/// A custodian's vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryDecision {
    /// Vouch for the claimant
    Approve,
    /// Refuse the claimant
    Deny,
}

/// Status of a recovery request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    /// Collecting votes
    Pending,
    /// Approval threshold met
    Approved,
    /// Approval can no longer be reached
    Denied,
    /// Expired before resolution
    Expired,
}

impl RecoveryStatus {
    /// Convert to storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStatus::Pending => "pending",
            RecoveryStatus::Approved => "approved",
            RecoveryStatus::Denied => "denied",
            RecoveryStatus::Expired => "expired",
        }
    }

    /// Parse from storage string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecoveryStatus::Pending),
            "approved" => Some(RecoveryStatus::Approved),
            "denied" => Some(RecoveryStatus::Denied),
            "expired" => Some(RecoveryStatus::Expired),
            _ => None,
        }
    }

    /// Terminal states are immutable
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecoveryStatus::Pending)
    }
}

/// A transient recovery workflow object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Request id (UUID)
    pub id: String,
    /// The identity being recovered
    pub identity_id: String,
    /// Where the claimant can be reached
    pub claimant_contact: ContactChannel,
    /// Current status
    pub status: RecoveryStatus,
    /// Custodian ids that approved
    pub approvals: BTreeSet<String>,
    /// Custodian ids that denied
    pub denials: BTreeSet<String>,
    /// Approvals required (the threshold at initiation)
    pub required_approvals: u32,
    /// Total custodians at initiation
    pub total_custodians: u32,
    /// When the request was opened (Unix seconds)
    pub created_at: i64,
    /// Hard expiry (Unix seconds)
    pub expires_at: i64,
}

impl RecoveryRequest {
    /// Distinct approvals so far
    pub fn current_approvals(&self) -> u32 {
        self.approvals.len() as u32
    }

    /// Lazily apply expiry; never overrides a terminal state
    ///
    /// Returns true if the status changed to expired.
    pub fn apply_expiry(&mut self, now: i64) -> bool {
        if self.status == RecoveryStatus::Pending && now > self.expires_at {
            self.status = RecoveryStatus::Expired;
            return true;
        }
        false
    }

    /// Record a custodian's vote, overwriting any earlier vote by the
    /// same custodian
    pub fn record_vote(&mut self, custodian_id: &str, decision: RecoveryDecision) {
        match decision {
            RecoveryDecision::Approve => {
                self.denials.remove(custodian_id);
                self.approvals.insert(custodian_id.to_string());
            }
            RecoveryDecision::Deny => {
                self.approvals.remove(custodian_id);
                self.denials.insert(custodian_id.to_string());
            }
        }
    }

    /// Recompute status from the tallies
    ///
    /// Approval is evaluated before denial: a request that crosses both
    /// thresholds in the same evaluation resolves approved. Terminal
    /// states are left untouched.
    pub fn recompute_status(&mut self) {
        if self.status.is_terminal() {
            return;
        }

        if self.current_approvals() >= self.required_approvals {
            self.status = RecoveryStatus::Approved;
        } else if self.denials.len() as u32 > self.total_custodians - self.required_approvals {
            self.status = RecoveryStatus::Denied;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request(threshold: u32, total: u32) -> RecoveryRequest {
        RecoveryRequest {
            id: "req-1".into(),
            identity_id: "did:cstd:ztest".into(),
            claimant_contact: ContactChannel::Email("claimant@example.com".into()),
            status: RecoveryStatus::Pending,
            approvals: BTreeSet::new(),
            denials: BTreeSet::new(),
            required_approvals: threshold,
            total_custodians: total,
            created_at: 1000,
            expires_at: 2000,
        }
    }

    #[test]
    fn test_approval_threshold() {
        let mut req = request(2, 3);

        req.record_vote("c1", RecoveryDecision::Approve);
        req.recompute_status();
        assert_eq!(req.status, RecoveryStatus::Pending);
        assert_eq!(req.current_approvals(), 1);

        req.record_vote("c2", RecoveryDecision::Approve);
        req.recompute_status();
        assert_eq!(req.status, RecoveryStatus::Approved);
    }

    #[test]
    fn test_denial_threshold() {
        // threshold 2 of 3: denials > 3 - 2 = 1, so two denials deny
        let mut req = request(2, 3);

        req.record_vote("c1", RecoveryDecision::Deny);
        req.recompute_status();
        assert_eq!(req.status, RecoveryStatus::Pending);

        req.record_vote("c2", RecoveryDecision::Deny);
        req.recompute_status();
        assert_eq!(req.status, RecoveryStatus::Denied);
    }

    #[test]
    fn test_vote_idempotence() {
        let mut req = request(2, 3);

        req.record_vote("c1", RecoveryDecision::Approve);
        req.record_vote("c1", RecoveryDecision::Approve);
        req.recompute_status();

        assert_eq!(req.current_approvals(), 1);
        assert_eq!(req.status, RecoveryStatus::Pending);
    }

    #[test]
    fn test_revote_overwrites() {
        let mut req = request(2, 3);

        req.record_vote("c1", RecoveryDecision::Deny);
        req.record_vote("c1", RecoveryDecision::Approve);

        assert_eq!(req.current_approvals(), 1);
        assert!(req.denials.is_empty());
    }

    #[test]
    fn test_approval_wins_tie_break() {
        // threshold 2 of 2: one denial exceeds N - T = 0, two approvals
        // meet T. Arrange both conditions true at one evaluation.
        let mut req = request(2, 2);
        req.record_vote("c1", RecoveryDecision::Approve);
        req.record_vote("c2", RecoveryDecision::Approve);
        // Simulate stale tallies where a denial also sits recorded
        req.denials.insert("c3".to_string());

        req.recompute_status();
        assert_eq!(req.status, RecoveryStatus::Approved);
    }

    #[test]
    fn test_expiry_overrides_pending_only() {
        let mut req = request(2, 3);
        assert!(req.apply_expiry(2001));
        assert_eq!(req.status, RecoveryStatus::Expired);

        let mut approved = request(2, 3);
        approved.record_vote("c1", RecoveryDecision::Approve);
        approved.record_vote("c2", RecoveryDecision::Approve);
        approved.recompute_status();

        assert!(!approved.apply_expiry(2001));
        assert_eq!(approved.status, RecoveryStatus::Approved);
    }

    #[test]
    fn test_terminal_states_immutable() {
        let mut req = request(2, 3);
        req.record_vote("c1", RecoveryDecision::Deny);
        req.record_vote("c2", RecoveryDecision::Deny);
        req.recompute_status();
        assert_eq!(req.status, RecoveryStatus::Denied);

        // Later approvals cannot flip a terminal state
        req.record_vote("c1", RecoveryDecision::Approve);
        req.record_vote("c2", RecoveryDecision::Approve);
        req.record_vote("c3", RecoveryDecision::Approve);
        req.recompute_status();
        assert_eq!(req.status, RecoveryStatus::Denied);
    }

    #[test]
    fn test_config_readiness() {
        let custodian = |id: &str, status: CustodianStatus| Custodian {
            id: id.into(),
            name: "C".into(),
            kind: CustodianKind::Person,
            contact: ContactChannel::Email("c@example.com".into()),
            public_key: [0u8; 32],
            trust: TrustLevel::Medium,
            status,
            enrolled_at: 0,
        };

        let mut config = RecoveryConfig {
            threshold: 2,
            custodians: vec![
                custodian("c1", CustodianStatus::Active),
                custodian("c2", CustodianStatus::Pending),
            ],
            recovery_key: crate::crypto::encrypt(
                &crate::crypto::EncryptionKey::from_bytes([1u8; 32]),
                b"rk",
                [0u8; crate::crypto::SALT_SIZE],
                b"",
            )
            .unwrap(),
            is_ready: false,
        };

        config.recompute_ready();
        assert!(!config.is_ready);

        config.custodian_mut("c2").unwrap().status = CustodianStatus::Active;
        config.recompute_ready();
        assert!(config.is_ready);
    }
}
