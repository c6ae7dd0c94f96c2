//! # Recovery Manager
//!
//! Orchestrates custodian enrollment, invitation lifecycle, and the
//! threshold-approval recovery state machine. On an approved request the
//! holder supplies a new passcode and the manager rotates the full key
//! pair — the old public key is revoked, not merely re-wrapped.
//!
//! Recovery requests are transient workflow objects held in memory;
//! custodian sets and recovery configuration persist through the store.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::{ContactChannel, NotificationChannel, NotificationKind};
use crate::crypto::{self, CryptoCore, EncryptionKey, KeyPair};
use crate::error::{Error, Result};
use crate::events::{SecurityEventKind, SecurityEventLog};
use crate::identity::{IdentityRecord, IdentityStatus};
use crate::lock::KeyedMutex;
use crate::payload::{Envelope, PayloadType};
use crate::recovery::{
    Custodian, CustodianKind, CustodianStatus, RecoveryConfig, RecoveryDecision, RecoveryRequest,
    RecoveryStatus, TrustLevel, MAX_CUSTODIANS, MIN_CUSTODIANS,
};
use crate::store::SecureStore;
use crate::time;

/// How long a custodian invitation stays valid (24 hours)
pub const INVITATION_TTL_SECS: i64 = 24 * 60 * 60;

/// How long a recovery request stays open (72 hours)
pub const RECOVERY_WINDOW_SECS: i64 = 72 * 60 * 60;

/// Store namespace for recovery configuration
const RECOVERY_NAMESPACE: &str = "recovery";

/// Default approval threshold for a fresh configuration
const DEFAULT_THRESHOLD: u32 = MIN_CUSTODIANS as u32;

/// Enrollment details for a new custodian
#[derive(Debug, Clone)]
pub struct CustodianSpec {
    /// Display name
    pub name: String,
    /// What kind of party this is
    pub kind: CustodianKind,
    /// Contact channel
    pub contact: ContactChannel,
    /// Their Ed25519 public key
    pub public_key: [u8; 32],
    /// Assigned trust level
    pub trust: TrustLevel,
}

/// Invitation payload carried in the QR envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InvitationPayload {
    invitation_id: String,
    identity_id: String,
    custodian_id: String,
    custodian_name: String,
}

/// An outstanding invitation
#[derive(Debug, Clone)]
struct Invitation {
    identity_id: String,
    custodian_id: String,
    expires_at: i64,
}

/// Service managing custodians and recovery requests
pub struct RecoveryManager {
    crypto: Arc<CryptoCore>,
    store: Arc<SecureStore>,
    events: Arc<SecurityEventLog>,
    /// Seals per-identity recovery keys
    seal_key: EncryptionKey,
    /// Delivery channel for custodian vote requests, when configured
    notifier: Option<Arc<dyn NotificationChannel>>,
    /// Serializes config read-modify-write per identity
    config_locks: KeyedMutex,
    /// Transient recovery requests; the map mutex serializes vote tallies
    requests: Mutex<HashMap<String, RecoveryRequest>>,
    /// Outstanding invitations, single-use
    invitations: Mutex<HashMap<String, Invitation>>,
}

impl RecoveryManager {
    /// Create a recovery manager
    pub fn new(
        crypto: Arc<CryptoCore>,
        store: Arc<SecureStore>,
        events: Arc<SecurityEventLog>,
        seal_key: EncryptionKey,
    ) -> Self {
        Self {
            crypto,
            store,
            events,
            seal_key,
            notifier: None,
            config_locks: KeyedMutex::new(),
            requests: Mutex::new(HashMap::new()),
            invitations: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a delivery channel for custodian vote requests
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationChannel>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    // ========================================================================
    // CUSTODIAN ENROLLMENT
    // ========================================================================

    /// Enroll a custodian for an identity
    ///
    /// The first enrollment creates the recovery configuration with a
    /// fresh sealed recovery key and the default threshold. Readiness is
    /// recomputed on every change.
    ///
    /// ## Errors
    ///
    /// - `Validation` if the identity already has [`MAX_CUSTODIANS`]
    /// - `Conflict` if the custodian's key is already enrolled
    pub async fn enroll_custodian(&self, identity_id: &str, spec: CustodianSpec) -> Result<Custodian> {
        let lock = self.config_locks.for_key(identity_id);
        let _guard = lock.lock().await;

        let record = self.require_identity(identity_id)?;

        let mut config = match self.load_config(identity_id)? {
            Some(config) => config,
            None => self.fresh_config(identity_id)?,
        };

        if config.custodians.len() >= MAX_CUSTODIANS {
            return Err(Error::validation(
                "custodian",
                format!("at most {} custodians per identity", MAX_CUSTODIANS),
            ));
        }
        if config.custodians.iter().any(|c| c.public_key == spec.public_key) {
            return Err(Error::Conflict("custodian key already enrolled".into()));
        }

        let custodian = Custodian {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            kind: spec.kind,
            contact: spec.contact,
            public_key: spec.public_key,
            trust: spec.trust,
            status: CustodianStatus::Pending,
            enrolled_at: time::now_timestamp(),
        };

        config.custodians.push(custodian.clone());
        config.recompute_ready();
        self.save_config(identity_id, &config)?;

        self.events.record(
            SecurityEventKind::CustodianEnrolled,
            Some(record.id.as_str()),
            format!("custodian {:?} ({})", custodian.name, custodian.id),
        );
        tracing::info!(identity = %record.id, custodian = %custodian.id, "custodian enrolled");

        Ok(custodian)
    }

    /// Remove a custodian and recompute readiness
    pub async fn remove_custodian(&self, identity_id: &str, custodian_id: &str) -> Result<()> {
        let lock = self.config_locks.for_key(identity_id);
        let _guard = lock.lock().await;

        let mut config = self
            .load_config(identity_id)?
            .ok_or_else(|| Error::NotFound(format!("recovery config for {}", identity_id)))?;

        let before = config.custodians.len();
        config.custodians.retain(|c| c.id != custodian_id);
        if config.custodians.len() == before {
            return Err(Error::NotFound(format!("custodian {}", custodian_id)));
        }

        config.recompute_ready();
        self.save_config(identity_id, &config)?;

        self.events.record(
            SecurityEventKind::CustodianRemoved,
            Some(identity_id),
            format!("custodian {}", custodian_id),
        );
        Ok(())
    }

    /// Change the approval threshold
    pub async fn set_threshold(&self, identity_id: &str, threshold: u32) -> Result<RecoveryConfig> {
        let lock = self.config_locks.for_key(identity_id);
        let _guard = lock.lock().await;

        let mut config = self
            .load_config(identity_id)?
            .ok_or_else(|| Error::NotFound(format!("recovery config for {}", identity_id)))?;

        if (threshold as usize) < MIN_CUSTODIANS || threshold as usize > config.custodians.len() {
            return Err(Error::validation(
                "threshold",
                format!(
                    "must be between {} and the custodian count ({})",
                    MIN_CUSTODIANS,
                    config.custodians.len()
                ),
            ));
        }

        config.threshold = threshold;
        config.recompute_ready();
        self.save_config(identity_id, &config)?;

        Ok(config)
    }

    /// The identity's recovery configuration, if any
    pub fn get_config(&self, identity_id: &str) -> Result<Option<RecoveryConfig>> {
        self.load_config(identity_id)
    }

    // ========================================================================
    // INVITATIONS
    // ========================================================================

    /// Create a signed, expiring invitation for a pending custodian
    ///
    /// The holder authorizes the invitation with their passcode; the
    /// envelope is signed with the identity's key so the custodian can
    /// verify who invited them.
    pub async fn create_invitation(
        &self,
        identity_id: &str,
        custodian_id: &str,
        passcode: &str,
    ) -> Result<Envelope> {
        let record = self.require_identity(identity_id)?;
        let config = self
            .load_config(identity_id)?
            .ok_or_else(|| Error::NotFound(format!("recovery config for {}", identity_id)))?;

        let custodian = config
            .custodian(custodian_id)
            .ok_or_else(|| Error::NotFound(format!("custodian {}", custodian_id)))?;
        if custodian.status != CustodianStatus::Pending {
            return Err(Error::Conflict(format!(
                "custodian is {:?}, expected pending",
                custodian.status
            )));
        }

        let keys = self.unwrap_keys(&record, passcode).await?;

        let invitation_id = Uuid::new_v4().to_string();
        let payload = InvitationPayload {
            invitation_id: invitation_id.clone(),
            identity_id: identity_id.to_string(),
            custodian_id: custodian_id.to_string(),
            custodian_name: custodian.name.clone(),
        };
        let envelope = Envelope::seal_signed(
            PayloadType::CustodianInvitation,
            &payload,
            INVITATION_TTL_SECS,
            &keys.signing,
        )?;

        self.invitations.lock().insert(
            invitation_id,
            Invitation {
                identity_id: identity_id.to_string(),
                custodian_id: custodian_id.to_string(),
                expires_at: envelope.expires_at,
            },
        );

        Ok(envelope)
    }

    /// Accept an invitation, activating the custodian
    ///
    /// Single-use: the invitation is consumed before the config is
    /// touched, so a second acceptance fails with `Conflict`.
    pub async fn accept_invitation(&self, envelope: &Envelope) -> Result<Custodian> {
        if envelope.payload_type != PayloadType::CustodianInvitation {
            return Err(Error::validation("envelope", "not a custodian invitation"));
        }

        let payload: InvitationPayload = envelope.open(true)?;

        let record = self.require_identity(&payload.identity_id)?;
        if !envelope.signed_by(&record.public_keys.signing) {
            return Err(Error::Integrity(
                "invitation not signed by the inviting identity".into(),
            ));
        }

        // Consume atomically under the invitation lock
        let invitation = {
            let mut invitations = self.invitations.lock();
            match invitations.remove(&payload.invitation_id) {
                Some(inv) => inv,
                None => return Err(Error::Conflict("invitation unknown or already used".into())),
            }
        };

        let now = time::now_timestamp();
        if now > invitation.expires_at {
            return Err(Error::Expired {
                expired_at: invitation.expires_at,
            });
        }

        let lock = self.config_locks.for_key(&invitation.identity_id);
        let _guard = lock.lock().await;

        let mut config = self
            .load_config(&invitation.identity_id)?
            .ok_or_else(|| Error::NotFound(format!("recovery config for {}", invitation.identity_id)))?;

        let custodian = config
            .custodian_mut(&invitation.custodian_id)
            .ok_or_else(|| Error::NotFound(format!("custodian {}", invitation.custodian_id)))?;
        custodian.status = CustodianStatus::Active;
        let activated = custodian.clone();

        config.recompute_ready();
        self.save_config(&invitation.identity_id, &config)?;

        self.events.record(
            SecurityEventKind::CustodianActivated,
            Some(invitation.identity_id.as_str()),
            format!("custodian {}", activated.id),
        );
        tracing::info!(
            identity = %invitation.identity_id,
            custodian = %activated.id,
            ready = config.is_ready,
            "custodian activated"
        );

        Ok(activated)
    }

    // ========================================================================
    // RECOVERY REQUESTS
    // ========================================================================

    /// Open a recovery request for an identity by handle
    ///
    /// ## Errors
    ///
    /// - `Validation` if recovery is not configured or not ready
    /// - `Conflict` if a pending request already exists
    pub async fn initiate_recovery(
        &self,
        handle: &str,
        claimant_contact: ContactChannel,
    ) -> Result<RecoveryRequest> {
        let mut record = self
            .store
            .get_record(handle)?
            .ok_or_else(|| Error::NotFound(format!("identity {:?}", handle)))?;

        let config = self
            .load_config(&record.id)?
            .filter(|c| c.is_ready)
            .ok_or_else(|| Error::validation("recovery", "recovery is not configured"))?;

        let now = time::now_timestamp();
        let request = RecoveryRequest {
            id: Uuid::new_v4().to_string(),
            identity_id: record.id.clone(),
            claimant_contact,
            status: RecoveryStatus::Pending,
            approvals: BTreeSet::new(),
            denials: BTreeSet::new(),
            required_approvals: config.threshold,
            total_custodians: config.active_custodians() as u32,
            created_at: now,
            expires_at: now + RECOVERY_WINDOW_SECS,
        };

        // Check-and-insert under one lock: two racing initiations cannot
        // both open a pending request
        {
            let mut requests = self.requests.lock();
            if requests
                .values()
                .any(|r| r.identity_id == record.id && r.status == RecoveryStatus::Pending && now <= r.expires_at)
            {
                return Err(Error::Conflict("a recovery request is already pending".into()));
            }
            requests.insert(request.id.clone(), request.clone());
        }

        record.status = IdentityStatus::Recovering;
        record.updated_at = now;
        self.store.put_record(&record)?;

        self.events.record(
            SecurityEventKind::RecoveryInitiated,
            Some(record.id.as_str()),
            format!(
                "request {} requires {} of {} approvals",
                request.id, request.required_approvals, request.total_custodians
            ),
        );
        tracing::info!(identity = %record.id, request = %request.id, "recovery initiated");

        // Ask every active custodian to vote; delivery failures are the
        // channel's problem, not the request's
        if let Some(notifier) = &self.notifier {
            let body = format!(
                "Recovery requested for {:?} (request {}). Approve or deny within {} hours.",
                handle,
                request.id,
                RECOVERY_WINDOW_SECS / 3600
            );
            for custodian in config.custodians.iter().filter(|c| c.status == CustodianStatus::Active) {
                if let Err(e) = notifier
                    .send(&custodian.contact, NotificationKind::RecoveryApproval, &body)
                    .await
                {
                    tracing::warn!(custodian = %custodian.id, "vote request delivery failed: {}", e);
                }
            }
        }

        Ok(request)
    }

    /// Fetch a request, applying lazy expiry
    pub fn get_request(&self, request_id: &str) -> Result<RecoveryRequest> {
        let mut requests = self.requests.lock();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| Error::NotFound(format!("recovery request {}", request_id)))?;

        if request.apply_expiry(time::now_timestamp()) {
            self.events.record(
                SecurityEventKind::RecoveryExpired,
                Some(request.identity_id.as_str()),
                format!("request {}", request.id),
            );
        }

        Ok(request.clone())
    }

    /// Record a custodian's vote on a request
    ///
    /// Idempotent per custodian: a second vote overwrites the first. The
    /// whole read-modify-write runs under the request map lock, so
    /// concurrent votes cannot lose updates.
    ///
    /// ## Errors
    ///
    /// - `Expired` once the request is past its window
    /// - `Conflict` if the request already resolved
    /// - `Validation` if the voter is not an active custodian
    pub fn submit_approval(
        &self,
        request_id: &str,
        custodian_id: &str,
        decision: RecoveryDecision,
    ) -> Result<RecoveryRequest> {
        let mut requests = self.requests.lock();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| Error::NotFound(format!("recovery request {}", request_id)))?;

        let now = time::now_timestamp();
        if request.apply_expiry(now) {
            self.events.record(
                SecurityEventKind::RecoveryExpired,
                Some(request.identity_id.as_str()),
                format!("request {}", request.id),
            );
        }
        match request.status {
            RecoveryStatus::Pending => {}
            RecoveryStatus::Expired => {
                return Err(Error::Expired {
                    expired_at: request.expires_at,
                })
            }
            status => {
                return Err(Error::Conflict(format!(
                    "request already resolved: {}",
                    status.as_str()
                )))
            }
        }

        let config = self
            .load_config(&request.identity_id)?
            .ok_or_else(|| Error::NotFound(format!("recovery config for {}", request.identity_id)))?;
        match config.custodian(custodian_id) {
            Some(c) if c.status == CustodianStatus::Active => {}
            Some(_) => {
                return Err(Error::validation("custodian", "custodian is not active"));
            }
            None => {
                return Err(Error::validation("custodian", "not a custodian of this identity"));
            }
        }

        request.record_vote(custodian_id, decision);
        request.recompute_status();

        self.events.record(
            SecurityEventKind::RecoveryVote,
            Some(request.identity_id.as_str()),
            format!(
                "custodian {} voted {:?} on {} ({}/{} approvals)",
                custodian_id,
                decision,
                request.id,
                request.current_approvals(),
                request.required_approvals
            ),
        );

        match request.status {
            RecoveryStatus::Approved => {
                self.events.record(
                    SecurityEventKind::RecoveryApproved,
                    Some(request.identity_id.as_str()),
                    format!("request {}", request.id),
                );
                tracing::info!(request = %request.id, "recovery approved");
            }
            RecoveryStatus::Denied => {
                self.events.record(
                    SecurityEventKind::RecoveryDenied,
                    Some(request.identity_id.as_str()),
                    format!("request {}", request.id),
                );
                tracing::warn!(request = %request.id, "recovery denied");
            }
            _ => {}
        }

        Ok(request.clone())
    }

    /// Complete an approved recovery with a new passcode
    ///
    /// Performs a full key rotation: a fresh key pair is generated and
    /// wrapped under the new passcode, the old public key moves to the
    /// revoked list, and the sealed recovery key is replaced. The request
    /// is consumed on success.
    pub async fn complete_recovery(
        &self,
        request_id: &str,
        new_passcode: &str,
    ) -> Result<IdentityRecord> {
        let strength = crypto::validate_passcode_strength(new_passcode);
        if !strength.is_valid {
            return Err(Error::validation("passcode", strength.errors.join("; ")));
        }

        // Snapshot the approved request without consuming it yet
        let request = {
            let mut requests = self.requests.lock();
            let request = requests
                .get_mut(request_id)
                .ok_or_else(|| Error::NotFound(format!("recovery request {}", request_id)))?;
            request.apply_expiry(time::now_timestamp());

            match request.status {
                RecoveryStatus::Approved => request.clone(),
                RecoveryStatus::Expired => {
                    return Err(Error::Expired {
                        expired_at: request.expires_at,
                    })
                }
                status => {
                    return Err(Error::Conflict(format!(
                        "request is {}, expected approved",
                        status.as_str()
                    )))
                }
            }
        };

        let lock = self.config_locks.for_key(&request.identity_id);
        let _guard = lock.lock().await;

        let mut record = self.require_identity(&request.identity_id)?;

        // Full rotation: fresh key pair wrapped under the new passcode
        let keypair = self.crypto.generate_key_pair();
        let salt = crypto::generate_salt();
        let wrap_key = self.crypto.derive_passcode_key(new_passcode, salt).await?;
        let wrapped_keys = self
            .crypto
            .encrypt(
                &wrap_key,
                &*keypair.secret_bytes(),
                salt,
                &IdentityRecord::key_wrap_aad(&record.id),
            )
            .await?;

        let old_keys = std::mem::replace(&mut record.public_keys, keypair.public_keys());
        record.revoked_keys.push(old_keys);
        record.wrapped_keys = wrapped_keys;
        record.status = IdentityStatus::Active;
        record.security = Default::default();
        record.updated_at = time::now_timestamp();
        self.store.put_record(&record)?;

        // Rotate the sealed recovery key alongside the key pair
        if let Some(mut config) = self.load_config(&record.id)? {
            config.recovery_key = self.seal_recovery_key(&record.id)?;
            self.save_config(&record.id, &config)?;
        }

        // Consume the request
        self.requests.lock().remove(request_id);

        self.events.record(
            SecurityEventKind::RecoveryCompleted,
            Some(record.id.as_str()),
            format!("request {} rotated keys", request_id),
        );
        tracing::info!(identity = %record.id, request = request_id, "recovery completed");

        Ok(record)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Expire stale requests and invitations
    ///
    /// Idempotent; identities whose pending request expired return to
    /// active status.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = time::now_timestamp();
        let mut expired_identities = Vec::new();

        {
            let mut requests = self.requests.lock();
            for request in requests.values_mut() {
                if request.apply_expiry(now) {
                    self.events.record(
                        SecurityEventKind::RecoveryExpired,
                        Some(request.identity_id.as_str()),
                        format!("request {}", request.id),
                    );
                    expired_identities.push(request.identity_id.clone());
                }
            }
        }

        for identity_id in &expired_identities {
            if let Some(mut record) = self.store.get_record(identity_id)? {
                if record.status == IdentityStatus::Recovering {
                    record.status = IdentityStatus::Active;
                    record.updated_at = now;
                    self.store.put_record(&record)?;
                }
            }
        }

        self.invitations.lock().retain(|_, inv| inv.expires_at >= now);

        Ok(expired_identities.len())
    }

    // ========================================================================
    // INTERNAL
    // ========================================================================

    fn require_identity(&self, identity_id: &str) -> Result<IdentityRecord> {
        self.store
            .get_record(identity_id)?
            .ok_or_else(|| Error::NotFound(format!("identity {}", identity_id)))
    }

    fn load_config(&self, identity_id: &str) -> Result<Option<RecoveryConfig>> {
        self.store.get_keyed(RECOVERY_NAMESPACE, identity_id)
    }

    fn save_config(&self, identity_id: &str, config: &RecoveryConfig) -> Result<()> {
        self.store.put_keyed(RECOVERY_NAMESPACE, identity_id, config)
    }

    fn fresh_config(&self, identity_id: &str) -> Result<RecoveryConfig> {
        Ok(RecoveryConfig {
            threshold: DEFAULT_THRESHOLD,
            custodians: Vec::new(),
            recovery_key: self.seal_recovery_key(identity_id)?,
            is_ready: false,
        })
    }

    /// Generate and seal a fresh recovery key for an identity
    fn seal_recovery_key(&self, identity_id: &str) -> Result<crate::crypto::EncryptedBlob> {
        let mut recovery_key = zeroize::Zeroizing::new([0u8; 32]);
        rand::rngs::OsRng.fill_bytes(&mut *recovery_key);

        let mut aad = Vec::with_capacity(12 + identity_id.len());
        aad.extend_from_slice(b"recovery-key:");
        aad.extend_from_slice(identity_id.as_bytes());

        crypto::encrypt(&self.seal_key, &*recovery_key, [0u8; crypto::SALT_SIZE], &aad)
    }

    /// Unwrap the identity's keys for one operation
    async fn unwrap_keys(&self, record: &IdentityRecord, passcode: &str) -> Result<KeyPair> {
        let wrap_key = self
            .crypto
            .derive_passcode_key(passcode, record.wrapped_keys.salt)
            .await?;
        let secret = self
            .crypto
            .decrypt(
                &wrap_key,
                &record.wrapped_keys,
                &IdentityRecord::key_wrap_aad(&record.id),
            )
            .await
            .map_err(|e| match e {
                // A wrap-key mismatch here means a wrong passcode
                Error::Integrity(_) => Error::Authentication,
                other => other,
            })?;

        KeyPair::from_secret_bytes(&secret)
    }
}

// ============================================================================
// TESTS
// ============================================================================
