use crate::error::ScanError;
use crate::queue::TaskQueue;
use crate::registry::ScanRegistry;
use crate::scan::types::{validate_target, ScanId, ScanRecord, ScanRequest, ScanState, ScanTask};

use std::sync::Arc;

/// Accepts scan requests and turns them into a registry record plus a queued task.
pub struct ScanProducer {
    registry: Arc<dyn ScanRegistry>,
    queue: Arc<dyn TaskQueue>,
}

impl ScanProducer {
    pub fn new(registry: Arc<dyn ScanRegistry>, queue: Arc<dyn TaskQueue>) -> Arc<Self> {
        Arc::new(Self { registry, queue })
    }

    /// Submits a scan and returns its id without waiting for execution.
    ///
    /// The `Pending` record is written before the task is published, so a status
    /// query can never miss a scan that a worker is already running. If publishing
    /// fails the record is moved to `Error` and `ScanError::Submission` is returned.
    pub async fn submit(&self, request: ScanRequest) -> Result<ScanId, ScanError> {
        let target = validate_target(&request.target).map_err(ScanError::InvalidRequest)?;
        let task = ScanTask::new(ScanId::new(), target, request.scan_type);

        self.registry.create(ScanRecord::pending(&task)).await?;

        if let Err(e) = self.queue.publish(&task).await {
            let reason = e.to_string();
            tracing::error!("Failed to publish scan {}: {}", task.scan_id, reason);

            let failed = ScanRecord::with_state(
                &task,
                ScanState::Error(format!("task submission failed: {}", reason)),
            );
            if let Err(e) = self.registry.finalize(failed).await {
                tracing::error!(
                    "Scan {} is left pending after a failed submission: {}",
                    task.scan_id,
                    e
                );
            }

            return Err(ScanError::Submission {
                scan_id: task.scan_id,
                reason,
            });
        }

        tracing::info!(
            "Scan {} submitted ({} scan of {})",
            task.scan_id,
            task.scan_type,
            task.target
        );
        Ok(task.scan_id)
    }
}
