//! Scan Registry Module
//!
//! Maps a scan id to its current `ScanRecord`. This is the only shared mutable
//! state of the system: the producer creates records, workers finalize them and
//! the status service reads them.
//!
//! ## Backends
//! - **`memory`**: a `DashMap` for single-process deployments and tests.
//! - **`redis`**: one JSON document per scan under `<prefix>:<scan id>`, visible to
//!   every producer and worker process sharing the broker.
//!
//! ## Write rules
//! - `create` only accepts `Pending` records and refuses to overwrite an existing id.
//! - `finalize` only accepts terminal records and upserts, keeping the original
//!   `created_at`. A redelivered task therefore overwrites a terminal record with an
//!   equivalent one, and nothing can move a record back to `Pending`.

pub mod memory;
pub mod redis;

use crate::scan::types::{ScanId, ScanRecord, ScanStatus};

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::InMemoryRegistry;
pub use self::redis::RedisRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("scan {0} already exists")]
    AlreadyExists(ScanId),

    #[error("scan {scan_id} cannot be recorded as {status} here")]
    InvalidTransition { scan_id: ScanId, status: ScanStatus },

    #[error("registry backend error: {0}")]
    Backend(String),

    #[error("failed to encode scan record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<::redis::RedisError> for RegistryError {
    fn from(err: ::redis::RedisError) -> Self {
        RegistryError::Backend(err.to_string())
    }
}

/// Keyed store of scan records.
#[async_trait]
pub trait ScanRegistry: Send + Sync {
    /// Inserts a new `Pending` record.
    async fn create(&self, record: ScanRecord) -> Result<(), RegistryError>;

    /// Stores a terminal (`Done`/`Error`) record, creating it if necessary.
    async fn finalize(&self, record: ScanRecord) -> Result<(), RegistryError>;

    /// Snapshot of the record, if the id is known.
    async fn get(&self, scan_id: &ScanId) -> Result<Option<ScanRecord>, RegistryError>;
}

pub(crate) fn ensure_pending(record: &ScanRecord) -> Result<(), RegistryError> {
    if record.state.is_terminal() {
        return Err(RegistryError::InvalidTransition {
            scan_id: record.scan_id.clone(),
            status: record.status(),
        });
    }
    Ok(())
}

pub(crate) fn ensure_terminal(record: &ScanRecord) -> Result<(), RegistryError> {
    if !record.state.is_terminal() {
        return Err(RegistryError::InvalidTransition {
            scan_id: record.scan_id.clone(),
            status: record.status(),
        });
    }
    Ok(())
}

/// Whether storing `record` over `existing` turns a finished scan into a failed one.
pub(crate) fn is_downgrade(existing: &ScanRecord, record: &ScanRecord) -> bool {
    existing.status() == ScanStatus::Done && record.status() == ScanStatus::Error
}

/// Logs a terminal record being replaced. A `Done` scan turning into `Error`
/// (e.g. a redelivered run that panicked) is logged as a warning.
pub(crate) fn log_overwrite(existing: &ScanRecord, record: &ScanRecord) {
    if !existing.state.is_terminal() {
        return;
    }

    if is_downgrade(existing, record) {
        tracing::warn!(
            "Scan {} was done and is now recorded as an error: {}",
            record.scan_id,
            record.state.result_json().unwrap_or_default()
        );
    } else {
        tracing::debug!(
            "Overwriting terminal scan {} ({} -> {})",
            record.scan_id,
            existing.status(),
            record.status()
        );
    }
}

#[cfg(test)]
mod tests;
