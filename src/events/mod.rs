//! # Security Event Log
//!
//! Append-only record of security-relevant actions: authentication
//! attempts, lockouts, custodian and recovery transitions, device pairing,
//! tool grants. Consumed by external telemetry.
//!
//! Consumers get two surfaces instead of emitter callbacks:
//!
//! - `subscribe()` — a bounded `tokio::sync::broadcast` channel of typed
//!   event records (slow subscribers lose oldest events, never block the
//!   managers)
//! - `recent()` — poll the bounded in-memory tail
//!
//! `forward_to` pushes the retained tail into an external
//! [`SecurityTelemetrySink`](crate::capability::SecurityTelemetrySink).

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::capability::SecurityTelemetrySink;
use crate::error::Result;
use crate::time;

/// Default number of events retained in memory
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// Successful authentication
    AuthSuccess,
    /// Failed authentication attempt
    AuthFailure,
    /// Identity locked after repeated failures
    Lockout,
    /// New identity created
    IdentityCreated,
    /// Identity deleted by its holder
    IdentityDeleted,
    /// Identity metadata updated
    MetadataUpdated,
    /// Tool access granted
    ToolAccessGranted,
    /// Tool access revoked
    ToolAccessRevoked,
    /// Custodian enrolled
    CustodianEnrolled,
    /// Custodian removed
    CustodianRemoved,
    /// Custodian accepted an invitation
    CustodianActivated,
    /// Recovery request opened
    RecoveryInitiated,
    /// Custodian vote recorded
    RecoveryVote,
    /// Recovery request reached approval threshold
    RecoveryApproved,
    /// Recovery request denied
    RecoveryDenied,
    /// Recovery request expired
    RecoveryExpired,
    /// Recovery completed with key rotation
    RecoveryCompleted,
    /// Device pairing session opened
    SyncInitiated,
    /// Device pairing completed
    SyncCompleted,
}

/// One security-relevant action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// What happened
    pub kind: SecurityEventKind,
    /// The identity involved, when there is one
    pub identity_id: Option<String>,
    /// Human-readable detail (never contains secrets or raw counters)
    pub detail: String,
    /// When it happened (Unix seconds)
    pub timestamp: i64,
}

/// Append-only, bounded security event log
pub struct SecurityEventLog {
    history: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
    tx: broadcast::Sender<SecurityEvent>,
}

impl SecurityEventLog {
    /// Create a log retaining up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            tx,
        }
    }

    /// Append an event
    pub fn record(
        &self,
        kind: SecurityEventKind,
        identity_id: Option<&str>,
        detail: impl Into<String>,
    ) {
        let event = SecurityEvent {
            kind,
            identity_id: identity_id.map(str::to_string),
            detail: detail.into(),
            timestamp: time::now_timestamp(),
        };

        tracing::debug!(kind = ?event.kind, identity = ?event.identity_id, "security event");

        {
            let mut history = self.history.lock();
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No subscribers is fine; the tail still retains the event
        let _ = self.tx.send(event);
    }

    /// Subscribe to events recorded after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.tx.subscribe()
    }

    /// The most recent events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Number of events currently retained
    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    /// Push the retained tail into an external telemetry sink
    pub async fn forward_to(&self, sink: &dyn SecurityTelemetrySink) -> Result<usize> {
        let snapshot: Vec<SecurityEvent> = self.history.lock().iter().cloned().collect();
        for event in &snapshot {
            sink.accept(event).await?;
        }
        Ok(snapshot.len())
    }
}

impl Default for SecurityEventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_recent() {
        let log = SecurityEventLog::new(10);

        log.record(SecurityEventKind::AuthFailure, Some("did:cstd:za"), "wrong passcode");
        log.record(SecurityEventKind::AuthSuccess, Some("did:cstd:za"), "authenticated");

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, SecurityEventKind::AuthFailure);
        assert_eq!(recent[1].kind, SecurityEventKind::AuthSuccess);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = SecurityEventLog::new(2);

        log.record(SecurityEventKind::AuthFailure, None, "one");
        log.record(SecurityEventKind::AuthFailure, None, "two");
        log.record(SecurityEventKind::AuthFailure, None, "three");

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].detail, "two");
        assert_eq!(recent[1].detail, "three");
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let log = SecurityEventLog::new(10);
        let mut rx = log.subscribe();

        log.record(SecurityEventKind::Lockout, Some("did:cstd:za"), "locked");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, SecurityEventKind::Lockout);
        assert_eq!(event.identity_id.as_deref(), Some("did:cstd:za"));
    }

    #[tokio::test]
    async fn test_forward_to_sink() {
        use async_trait::async_trait;
        use std::sync::Arc;

        struct CountingSink(Arc<parking_lot::Mutex<usize>>);

        #[async_trait]
        impl SecurityTelemetrySink for CountingSink {
            async fn accept(&self, _event: &SecurityEvent) -> Result<()> {
                *self.0.lock() += 1;
                Ok(())
            }
        }

        let log = SecurityEventLog::new(10);
        log.record(SecurityEventKind::RecoveryInitiated, None, "opened");
        log.record(SecurityEventKind::RecoveryApproved, None, "threshold met");

        let count = Arc::new(parking_lot::Mutex::new(0usize));
        let sink = CountingSink(count.clone());

        let forwarded = log.forward_to(&sink).await.unwrap();
        assert_eq!(forwarded, 2);
        assert_eq!(*count.lock(), 2);
    }
}
