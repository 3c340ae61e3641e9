//! HTTP Protocol Definitions
//!
//! Request and response bodies of the public scan API. All bodies use camelCase
//! field names; the submit request also accepts the older snake_case names.

use super::types::{ScanId, ScanStatus, ScanType};
use serde::{Deserialize, Serialize};

pub const ENDPOINT_SUBMIT_SCAN: &str = "/scan";
pub const ENDPOINT_SCAN: &str = "/scan/:scan_id";
pub const ENDPOINT_SCAN_STATUS: &str = "/scan/:scan_id/status";
pub const ENDPOINT_SCAN_RESULT: &str = "/scan/:scan_id/result";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScanRequest {
    #[serde(alias = "target_ip")]
    pub target: String,
    #[serde(default, alias = "scan_type")]
    pub scan_type: ScanType,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScanResponse {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    /// Set only when the task could not be queued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatusResponse {
    pub scan_id: ScanId,
    pub status: ScanStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultResponse {
    pub scan_id: ScanId,
    /// `null` while the scan is pending.
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
