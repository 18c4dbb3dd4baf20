use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::NaiveDate;
use tracing::debug;

use super::HistoryStore;
use crate::domain::{Fingerprint, HistoryEntry};
use crate::error::HistoryStoreError;

/// In-memory history for tests and dry runs. Not durable.
///
/// Each fingerprint has its own mutex, so writers for different fingerprints
/// only share the short map lock while the slot is located or created.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    entries: RwLock<HashMap<Fingerprint, Arc<Mutex<HistoryEntry>>>>,
    resurface_after_days: Option<u32>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resurfacing(resurface_after_days: Option<u32>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            resurface_after_days,
        }
    }

    fn slot(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<Mutex<HistoryEntry>>>, HistoryStoreError> {
        let entries = self.entries.read().map_err(|_| HistoryStoreError::Poisoned)?;
        Ok(entries.get(fingerprint).cloned())
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn check_available(&self) -> Result<(), HistoryStoreError> {
        self.entries
            .read()
            .map(|_| ())
            .map_err(|_| HistoryStoreError::Poisoned)
    }

    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<HistoryEntry>, HistoryStoreError> {
        match self.slot(fingerprint)? {
            Some(slot) => {
                let entry = slot.lock().map_err(|_| HistoryStoreError::Poisoned)?;
                Ok(Some(entry.clone()))
            }
            None => Ok(None),
        }
    }

    fn record_occurrence(
        &self,
        fingerprint: &Fingerprint,
        source: &str,
        observed: NaiveDate,
    ) -> Result<(HistoryEntry, bool), HistoryStoreError> {
        let slot = match self.slot(fingerprint)? {
            Some(slot) => slot,
            None => {
                let mut entries = self.entries.write().map_err(|_| HistoryStoreError::Poisoned)?;
                // Another writer may have created it between the two locks
                if let Some(existing) = entries.get(fingerprint) {
                    existing.clone()
                } else {
                    let entry = HistoryEntry::first(fingerprint.clone(), source, observed);
                    entries.insert(fingerprint.clone(), Arc::new(Mutex::new(entry.clone())));
                    debug!(fingerprint = fingerprint.short(), source, "history entry created");
                    return Ok((entry, true));
                }
            }
        };

        let mut entry = slot.lock().map_err(|_| HistoryStoreError::Poisoned)?;
        let resurfaced = entry.observe(source, observed, self.resurface_after_days);
        Ok((entry.clone(), resurfaced))
    }

    fn len(&self) -> Result<u64, HistoryStoreError> {
        let entries = self.entries.read().map_err(|_| HistoryStoreError::Poisoned)?;
        Ok(entries.len() as u64)
    }
}
