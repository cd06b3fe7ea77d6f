//! Shared durable key-value store: the cross-tab source of truth for
//! master-tab leases.
//!
//! Models a profile-shared browser store: synchronous reads and writes, no
//! locking, no transactions. Read-after-write is reliable only within one
//! tab; another tab sees a write on its next poll. Backends:
//!
//! - [`MemoryStore`]: mutex-guarded map for same-process tabs and tests.
//! - [`FileStore`]: file-per-key directory for tabs in separate processes.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use invigil_core::lease::MasterLease;
use invigil_core::types::AttemptId;
use thiserror::Error;

/// Errors surfaced by store backends. The election path treats every variant
/// as "store unavailable" and degrades to single-tab operation rather than
/// failing the session.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous shared key-value store.
pub trait SharedStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Key of the master lease for one attempt, namespaced against unrelated
/// keys sharing the store.
#[must_use]
pub fn lease_key(attempt_id: &AttemptId) -> String {
    format!("invigil:master:{}", attempt_id.as_str())
}

/// Read and decode the lease for an attempt. A corrupt record is treated as
/// absent; the next claim overwrites it.
pub fn read_lease(
    store: &dyn SharedStore,
    attempt_id: &AttemptId,
) -> Result<Option<MasterLease>, StoreError> {
    let Some(raw) = store.get(&lease_key(attempt_id))? else {
        return Ok(None);
    };
    Ok(serde_json::from_str(&raw).ok())
}

/// Encode and write the lease for an attempt.
pub fn write_lease(
    store: &dyn SharedStore,
    attempt_id: &AttemptId,
    lease: &MasterLease,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(lease).map_err(|e| StoreError::Unavailable(e.to_string()))?;
    store.put(&lease_key(attempt_id), &raw)
}

/// Delete the lease record for an attempt.
pub fn clear_lease(store: &dyn SharedStore, attempt_id: &AttemptId) -> Result<(), StoreError> {
    store.remove(&lease_key(attempt_id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
