//! # Secure Storage
//!
//! Persistent, encrypted-at-rest storage for identity records and
//! recovery state, with integrity verification on every read.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SECURE STORAGE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SecureStore                                                    │   │
//! │  │  ───────────                                                     │   │
//! │  │                                                                 │   │
//! │  │  • put_record / get_record / delete_record / list_records      │   │
//! │  │  • put_keyed / get_keyed / delete_keyed  (namespaced blobs)    │   │
//! │  │  • handle → id index, rebuilt on open, updated per write       │   │
//! │  │                                                                 │   │
//! │  │  Every value is sealed into an EncryptedBlob before it reaches │   │
//! │  │  the backend; every read verifies tag + checksum before         │   │
//! │  │  deserializing. A record that fails verification is reported    │   │
//! │  │  as Integrity, never returned.                                  │   │
//! │  └───────────────────────────┬─────────────────────────────────────┘   │
//! │                              │                                          │
//! │  ┌───────────────────────────▼─────────────────────────────────────┐   │
//! │  │  StorageBackend (raw KV, atomic per-record writes)              │   │
//! │  │                                                                 │   │
//! │  │  ┌───────────────┐   any KV/document store with atomic          │   │
//! │  │  │ MemoryBackend │   per-record writes satisfies the contract   │   │
//! │  │  └───────────────┘                                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Atomicity
//!
//! A put is one logical write: handle uniqueness check, backend write, and
//! index update happen under a single store-level write lock, and the
//! backend write itself is atomic per record. A failed put leaves neither
//! a partial record nor a dangling index entry.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

use crate::crypto::{self, EncryptedBlob, EncryptionKey};
use crate::error::{Error, Result};
use crate::identity::IdentityRecord;

/// Key prefix for identity records
const RECORD_PREFIX: &str = "identity:";

/// Raw key-value persistence with atomic per-record writes
///
/// Implementations must make each `put_raw`/`delete_raw` atomic: a crash
/// mid-write may lose the write but must never surface a torn value.
pub trait StorageBackend: Send + Sync {
    /// Store bytes under a key, replacing any existing value
    fn put_raw(&self, key: &str, value: &[u8]) -> Result<()>;
    /// Fetch bytes by key
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Remove a key; returns whether it existed
    fn delete_raw(&self, key: &str) -> Result<bool>;
    /// All keys currently present
    fn list_keys(&self) -> Result<Vec<String>>;
}

/// In-memory backend
///
/// Process-lifetime persistence, used directly in tests and as the
/// default backend. Durable engines plug in behind the same trait.
#[derive(Default)]
pub struct MemoryBackend {
    map: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn delete_raw(&self, key: &str) -> Result<bool> {
        Ok(self.map.write().remove(key).is_some())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.map.read().keys().cloned().collect())
    }
}

/// Encrypted record store with a maintained handle index
pub struct SecureStore {
    backend: Box<dyn StorageBackend>,
    record_key: EncryptionKey,
    /// handle → id; guards both the index and the write path
    handles: RwLock<HashMap<String, String>>,
}

impl SecureStore {
    /// Open a store over a backend, rebuilding the handle index
    ///
    /// `root_key` is split into purpose-bound subkeys; record bytes never
    /// see the root key directly.
    pub fn open(backend: Box<dyn StorageBackend>, root_key: EncryptionKey) -> Result<Self> {
        let record_key = crypto::derive_subkey(&root_key, crypto::domain::STORE_ENCRYPTION)?;

        let store = Self {
            backend,
            record_key,
            handles: RwLock::new(HashMap::new()),
        };

        let mut index = HashMap::new();
        for record in store.list_records()? {
            index.insert(record.handle.clone(), record.id.clone());
        }
        *store.handles.write() = index;

        tracing::info!("Secure store opened with {} records", store.handles.read().len());
        Ok(store)
    }

    /// Persist an identity record as one logical write
    ///
    /// Enforces handle uniqueness and the immutable id↔handle mapping.
    pub fn put_record(&self, record: &IdentityRecord) -> Result<()> {
        let mut handles = self.handles.write();

        match handles.get(&record.handle) {
            Some(existing_id) if existing_id != &record.id => {
                return Err(Error::Conflict(format!(
                    "handle {:?} is already taken",
                    record.handle
                )));
            }
            _ => {}
        }

        // The id must not already be indexed under a different handle
        if let Some((old_handle, _)) = handles
            .iter()
            .find(|(h, id)| *id == &record.id && *h != &record.handle)
        {
            return Err(Error::Conflict(format!(
                "identity {} is bound to handle {:?}; the mapping is immutable",
                record.id, old_handle
            )));
        }

        let bytes = bincode::serialize(record)?;
        let blob = crypto::encrypt(&self.record_key, &bytes, [0u8; crypto::SALT_SIZE], record.id.as_bytes())?;
        let sealed = bincode::serialize(&blob)?;

        self.backend.put_raw(&record_storage_key(&record.id), &sealed)?;
        handles.insert(record.handle.clone(), record.id.clone());

        Ok(())
    }

    /// Fetch a record by id or handle
    pub fn get_record(&self, id_or_handle: &str) -> Result<Option<IdentityRecord>> {
        let id = self.resolve_id(id_or_handle);

        let sealed = match self.backend.get_raw(&record_storage_key(&id))? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let record = self.open_record(&id, &sealed)?;
        Ok(Some(record))
    }

    /// Delete a record and its handle mapping atomically
    pub fn delete_record(&self, id: &str) -> Result<()> {
        let mut handles = self.handles.write();

        if !self.backend.delete_raw(&record_storage_key(id))? {
            return Err(Error::NotFound(format!("identity {}", id)));
        }
        handles.retain(|_, mapped_id| mapped_id.as_str() != id);

        Ok(())
    }

    /// All identity records
    pub fn list_records(&self) -> Result<Vec<IdentityRecord>> {
        let mut records = Vec::new();
        for key in self.backend.list_keys()? {
            if let Some(id) = key.strip_prefix(RECORD_PREFIX) {
                if let Some(sealed) = self.backend.get_raw(&key)? {
                    records.push(self.open_record(id, &sealed)?);
                }
            }
        }
        Ok(records)
    }

    /// Whether a handle is already taken
    pub fn handle_exists(&self, handle: &str) -> bool {
        self.handles.read().contains_key(handle)
    }

    // ========================================================================
    // NAMESPACED BLOBS (recovery configs, custodian sets)
    // ========================================================================

    /// Persist a serializable value under `namespace:id`
    pub fn put_keyed<T: Serialize>(&self, namespace: &str, id: &str, value: &T) -> Result<()> {
        let key = keyed_storage_key(namespace, id);
        let bytes = bincode::serialize(value)?;
        let blob = crypto::encrypt(&self.record_key, &bytes, [0u8; crypto::SALT_SIZE], key.as_bytes())?;
        self.backend.put_raw(&key, &bincode::serialize(&blob)?)
    }

    /// Fetch a value from `namespace:id`
    pub fn get_keyed<T: DeserializeOwned>(&self, namespace: &str, id: &str) -> Result<Option<T>> {
        let key = keyed_storage_key(namespace, id);
        let sealed = match self.backend.get_raw(&key)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let blob: EncryptedBlob = bincode::deserialize(&sealed)?;
        let plaintext = crypto::decrypt(&self.record_key, &blob, key.as_bytes())?;
        Ok(Some(bincode::deserialize(&plaintext)?))
    }

    /// Delete `namespace:id`; returns whether it existed
    pub fn delete_keyed(&self, namespace: &str, id: &str) -> Result<bool> {
        self.backend.delete_raw(&keyed_storage_key(namespace, id))
    }

    // ========================================================================
    // INTERNAL
    // ========================================================================

    fn resolve_id(&self, id_or_handle: &str) -> String {
        if id_or_handle.starts_with("did:") {
            return id_or_handle.to_string();
        }
        match self.handles.read().get(id_or_handle) {
            Some(id) => id.clone(),
            None => id_or_handle.to_string(),
        }
    }

    fn open_record(&self, id: &str, sealed: &[u8]) -> Result<IdentityRecord> {
        let blob: EncryptedBlob = bincode::deserialize(sealed)?;
        let plaintext = crypto::decrypt(&self.record_key, &blob, id.as_bytes())?;
        let record: IdentityRecord = bincode::deserialize(&plaintext)?;

        if record.id != id {
            return Err(Error::Integrity(format!(
                "record id mismatch: stored under {}, contains {}",
                id, record.id
            )));
        }

        Ok(record)
    }
}

fn record_storage_key(id: &str) -> String {
    format!("{}{}", RECORD_PREFIX, id)
}

fn keyed_storage_key(namespace: &str, id: &str) -> String {
    format!("{}:{}", namespace, id)
}

// ============================================================================
// TESTS
// ============================================================================
