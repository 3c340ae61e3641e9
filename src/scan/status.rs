use crate::error::ScanError;
use crate::registry::ScanRegistry;
use crate::scan::types::{ScanId, ScanRecord, ScanStatus};

use std::sync::Arc;

/// Read-only view of the registry for clients polling their scans.
pub struct StatusService {
    registry: Arc<dyn ScanRegistry>,
}

impl StatusService {
    pub fn new(registry: Arc<dyn ScanRegistry>) -> Arc<Self> {
        Arc::new(Self { registry })
    }

    pub async fn get_record(&self, scan_id: &ScanId) -> Result<ScanRecord, ScanError> {
        self.registry
            .get(scan_id)
            .await?
            .ok_or_else(|| ScanError::NotFound(scan_id.clone()))
    }

    pub async fn get_status(&self, scan_id: &ScanId) -> Result<ScanStatus, ScanError> {
        Ok(self.get_record(scan_id).await?.status())
    }

    /// `None` while the scan is pending, otherwise the composite result or
    /// `{"error": cause}`.
    pub async fn get_result(
        &self,
        scan_id: &ScanId,
    ) -> Result<Option<serde_json::Value>, ScanError> {
        Ok(self.get_record(scan_id).await?.state.result_json())
    }
}
