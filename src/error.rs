//! Errors surfaced to callers of the producer and the status service.
//!
//! Per-source lookup failures never show up here: they are data inside a
//! `CompositeResult`. Queue and registry backends have their own error types
//! in their modules.

use crate::registry::RegistryError;
use crate::scan::types::ScanId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// The request was rejected before any record was created.
    #[error("invalid scan request: {0}")]
    InvalidRequest(String),

    /// No record exists for this scan id.
    #[error("scan {0} not found")]
    NotFound(ScanId),

    /// The task could not be published. The record for `scan_id` has been
    /// moved to the error state.
    #[error("failed to submit scan {scan_id}: {reason}")]
    Submission { scan_id: ScanId, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
