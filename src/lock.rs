//! Per-key mutual exclusion.
//!
//! Authentication counters, recovery tallies, and sync-code consumption
//! are read-modify-write sequences against a single identity or request.
//! `KeyedMutex` hands out one async mutex per key so those sequences
//! serialize per key while unrelated keys proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// A map of named async mutexes
///
/// Guards are held across `.await` points (the KDF runs inside the
/// critical section during authentication), which is why the per-key
/// mutex is `tokio::sync::Mutex` rather than a parking_lot lock.
#[derive(Default)]
pub struct KeyedMutex {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedMutex {
    /// Create an empty lock map
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the mutex for a key
    ///
    /// Callers hold the returned `Arc` and lock it:
    ///
    /// ```ignore
    /// let lock = locks.for_key(id);
    /// let _guard = lock.lock().await;
    /// // read-modify-write is now serialized for `id`
    /// ```
    pub fn for_key(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop mutexes no longer held by anyone (maintenance)
    pub fn prune(&self) {
        self.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyedMutex::new());
        let counter = Arc::new(parking_lot::Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let lock = locks.for_key("alice");
                let _guard = lock.lock().await;
                // Non-atomic increment; only safe if the lock serializes us
                let current = *counter.lock();
                tokio::task::yield_now().await;
                *counter.lock() = current + 1;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*counter.lock(), 16);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = KeyedMutex::new();

        let a = locks.for_key("alice");
        let b = locks.for_key("bob");

        let _ga = a.lock().await;
        // Must not deadlock: different key, different mutex
        let _gb = b.lock().await;
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = KeyedMutex::new();

        let held = locks.for_key("alice");
        let _guard = held.lock().await;
        locks.for_key("bob"); // immediately dropped

        locks.prune();

        assert_eq!(locks.locks.lock().len(), 1);
        assert!(locks.locks.lock().contains_key("alice"));
    }
}
