//! # Transfer Envelope
//!
//! The signed, versioned, self-expiring structure carried in QR codes and
//! deep links: custodian invitations, device-sync handshakes, recovery
//! requests.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       TRANSFER ENVELOPE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  {                                                                      │
//! │    payload_type: custodian_invitation | device_sync | recovery_request │
//! │    version:      format version                                        │
//! │    timestamp:    issue time (Unix seconds)                             │
//! │    expires_at:   hard expiry (Unix seconds)                            │
//! │    data:         type-specific JSON payload                            │
//! │    signature?:   Ed25519 over (type ‖ version ‖ timestamps ‖ data)     │
//! │    signer?:      signing public key (present iff signature is)        │
//! │  }                                                                      │
//! │                                                                         │
//! │  Consumers MUST reject expired envelopes before inspecting data.       │
//! │  open() enforces that ordering: expiry first, then signature, then     │
//! │  deserialization.                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::crypto::{self, Signature, SigningKeyPair};
use crate::error::{Error, Result};
use crate::time;

/// Current envelope format version
pub const ENVELOPE_VERSION: u16 = 1;

/// What an envelope carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    /// Invitation for a custodian to enroll
    CustodianInvitation,
    /// Device pairing handshake
    DeviceSync,
    /// Recovery request presented to a custodian
    RecoveryRequest,
}

/// A signed, versioned, self-expiring transfer envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// What `data` contains
    pub payload_type: PayloadType,
    /// Format version
    pub version: u16,
    /// Issue time (Unix seconds)
    pub timestamp: i64,
    /// Hard expiry (Unix seconds)
    pub expires_at: i64,
    /// Type-specific payload
    pub data: serde_json::Value,
    /// Signature over the canonical signing bytes, when signed
    pub signature: Option<Signature>,
    /// Signer's Ed25519 public key, present iff `signature` is
    #[serde(with = "optional_hex_key")]
    pub signer: Option<[u8; 32]>,
}

impl Envelope {
    /// Seal a payload into an unsigned envelope
    pub fn seal<T: Serialize>(
        payload_type: PayloadType,
        data: &T,
        ttl_secs: i64,
    ) -> Result<Self> {
        let timestamp = time::now_timestamp();
        Ok(Self {
            payload_type,
            version: ENVELOPE_VERSION,
            timestamp,
            expires_at: timestamp + ttl_secs,
            data: serde_json::to_value(data)?,
            signature: None,
            signer: None,
        })
    }

    /// Seal and sign a payload
    pub fn seal_signed<T: Serialize>(
        payload_type: PayloadType,
        data: &T,
        ttl_secs: i64,
        keypair: &SigningKeyPair,
    ) -> Result<Self> {
        let mut envelope = Self::seal(payload_type, data, ttl_secs)?;
        let signature = crypto::sign(keypair, &envelope.signing_bytes()?);
        envelope.signature = Some(signature);
        envelope.signer = Some(keypair.public_bytes());
        Ok(envelope)
    }

    /// Open the envelope: expiry check, then signature, then payload
    ///
    /// ## Errors
    ///
    /// - `Expired` when `now > expires_at` — checked before `data` is
    ///   touched
    /// - `Integrity` when a present signature does not verify
    /// - `Validation` when a signature was required but is absent
    pub fn open<T: DeserializeOwned>(&self, require_signature: bool) -> Result<T> {
        let now = time::now_timestamp();
        if now > self.expires_at {
            return Err(Error::Expired {
                expired_at: self.expires_at,
            });
        }

        if self.version != ENVELOPE_VERSION {
            return Err(Error::validation(
                "envelope",
                format!("unsupported version {}", self.version),
            ));
        }

        match (&self.signature, &self.signer) {
            (Some(signature), Some(signer)) => {
                crypto::verify(signer, &self.signing_bytes()?, signature)?;
            }
            (None, None) if !require_signature => {}
            (None, None) => {
                return Err(Error::validation("envelope", "signature required"));
            }
            _ => {
                return Err(Error::validation(
                    "envelope",
                    "signature and signer must be present together",
                ));
            }
        }

        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Whether the envelope was signed by the given key
    pub fn signed_by(&self, public_key: &[u8; 32]) -> bool {
        self.signer.as_ref() == Some(public_key)
    }

    /// Encode for QR transport
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from QR transport
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The canonical bytes covered by the signature
    ///
    /// Everything except the signature fields, in declaration order.
    fn signing_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct SignView<'a> {
            payload_type: PayloadType,
            version: u16,
            timestamp: i64,
            expires_at: i64,
            data: &'a serde_json::Value,
        }

        Ok(bincode::serialize(&SignView {
            payload_type: self.payload_type,
            version: self.version,
            timestamp: self.timestamp,
            expires_at: self.expires_at,
            data: &self.data,
        })?)
    }
}

/// Serde helper for `Option<[u8; 32]>` as hex
mod optional_hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<String> = Option::deserialize(deserializer)?;
        match value {
            Some(s) => {
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                let array = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("Invalid key length"))?;
                Ok(Some(array))
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestPayload {
        invitation_id: String,
        identity_id: String,
    }

    fn payload() -> TestPayload {
        TestPayload {
            invitation_id: "inv-1".into(),
            identity_id: "did:cstd:ztest".into(),
        }
    }

    #[test]
    fn test_unsigned_round_trip() {
        let envelope = Envelope::seal(PayloadType::DeviceSync, &payload(), 600).unwrap();

        let opened: TestPayload = envelope.open(false).unwrap();
        assert_eq!(opened, payload());
    }

    #[test]
    fn test_signed_round_trip() {
        let keypair = SigningKeyPair::generate();
        let envelope =
            Envelope::seal_signed(PayloadType::CustodianInvitation, &payload(), 600, &keypair)
                .unwrap();

        assert!(envelope.signed_by(&keypair.public_bytes()));
        let opened: TestPayload = envelope.open(true).unwrap();
        assert_eq!(opened, payload());
    }

    #[test]
    fn test_expired_rejected_before_data() {
        let keypair = SigningKeyPair::generate();
        let mut envelope =
            Envelope::seal_signed(PayloadType::RecoveryRequest, &payload(), 600, &keypair).unwrap();
        envelope.expires_at = time::now_timestamp() - 1;

        // Expiry beats even a corrupted payload: data is never inspected
        envelope.data = serde_json::json!({"not": "the payload"});
        let result: Result<TestPayload> = envelope.open(true);
        assert!(matches!(result, Err(Error::Expired { .. })));
    }

    #[test]
    fn test_tampered_data_fails_signature() {
        let keypair = SigningKeyPair::generate();
        let mut envelope =
            Envelope::seal_signed(PayloadType::CustodianInvitation, &payload(), 600, &keypair)
                .unwrap();

        envelope.data = serde_json::json!({
            "invitation_id": "inv-2",
            "identity_id": "did:cstd:ztest"
        });

        let result: Result<TestPayload> = envelope.open(true);
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn test_missing_required_signature() {
        let envelope = Envelope::seal(PayloadType::CustodianInvitation, &payload(), 600).unwrap();

        let result: Result<TestPayload> = envelope.open(true);
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[test]
    fn test_json_round_trip() {
        let keypair = SigningKeyPair::generate();
        let envelope =
            Envelope::seal_signed(PayloadType::DeviceSync, &payload(), 600, &keypair).unwrap();

        let json = envelope.to_json().unwrap();
        let restored = Envelope::from_json(&json).unwrap();

        let opened: TestPayload = restored.open(true).unwrap();
        assert_eq!(opened, payload());
    }
}
