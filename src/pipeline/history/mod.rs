//! Run-to-run ledger of emitted fingerprints.

pub mod in_memory;
pub mod sqlite;

use chrono::NaiveDate;

use crate::domain::{Fingerprint, HistoryEntry};
use crate::error::HistoryStoreError;

pub use in_memory::InMemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

/// Key-value store of `Fingerprint -> HistoryEntry`.
///
/// `record_occurrence` is an atomic read-modify-write. Calls for the same
/// fingerprint serialize; calls for distinct fingerprints may run
/// concurrently. Once `record_occurrence` returns `Ok`, the update must
/// survive a process restart for durable implementations.
pub trait HistoryStore: Send + Sync {
    /// Cheap reachability probe made before a run mutates anything
    fn check_available(&self) -> Result<(), HistoryStoreError>;

    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<HistoryEntry>, HistoryStoreError>;

    /// Create or update the entry. The flag is true when the fingerprint was
    /// not present (or had gone stale under the resurfacing policy).
    fn record_occurrence(
        &self,
        fingerprint: &Fingerprint,
        source: &str,
        observed: NaiveDate,
    ) -> Result<(HistoryEntry, bool), HistoryStoreError>;

    /// Number of fingerprints in the ledger
    fn len(&self) -> Result<u64, HistoryStoreError>;

    fn is_empty(&self) -> Result<bool, HistoryStoreError> {
        Ok(self.len()? == 0)
    }
}
