use super::{ensure_pending, ensure_terminal, log_overwrite, RegistryError, ScanRegistry};
use crate::scan::types::{ScanId, ScanRecord, ScanStatus};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Process-local registry. Records live as long as the process.
#[derive(Default)]
pub struct InMemoryRegistry {
    records: DashMap<ScanId, ScanRecord>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns `(pending, done, error)` counts.
    pub fn status_counts(&self) -> (usize, usize, usize) {
        let mut pending = 0;
        let mut done = 0;
        let mut error = 0;

        for entry in self.records.iter() {
            match entry.status() {
                ScanStatus::Pending => pending += 1,
                ScanStatus::Done => done += 1,
                ScanStatus::Error => error += 1,
            }
        }

        (pending, done, error)
    }
}

#[async_trait]
impl ScanRegistry for InMemoryRegistry {
    async fn create(&self, record: ScanRecord) -> Result<(), RegistryError> {
        ensure_pending(&record)?;

        match self.records.entry(record.scan_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(record.scan_id)),
            Entry::Vacant(slot) => {
                tracing::debug!("Registered pending scan {}", record.scan_id);
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn finalize(&self, mut record: ScanRecord) -> Result<(), RegistryError> {
        ensure_terminal(&record)?;

        match self.records.entry(record.scan_id.clone()) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                log_overwrite(existing, &record);
                record.created_at = existing.created_at;
                *existing = record;
            }
            Entry::Vacant(slot) => {
                tracing::warn!(
                    "Finalizing scan {} that was never registered here",
                    record.scan_id
                );
                slot.insert(record);
            }
        }

        Ok(())
    }

    async fn get(&self, scan_id: &ScanId) -> Result<Option<ScanRecord>, RegistryError> {
        Ok(self.records.get(scan_id).map(|entry| entry.value().clone()))
    }
}
