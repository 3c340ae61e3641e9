//! Task Wire Format
//!
//! Tasks travel as a small versioned JSON envelope:
//!
//! ```text
//! {"v":1,"scanId":"7f0c…","target":"10.0.0.5","scanType":"basic"}
//! ```
//!
//! JSON escaping keeps every field intact whatever characters it contains. The
//! decoder still understands the older `scan_id|target|scan_type` payload so tasks
//! queued by earlier producers are not lost.

use crate::scan::types::{validate_target, ScanId, ScanTask, ScanType};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WIRE_VERSION: u8 = 1;

const LEGACY_SEPARATOR: char = '|';

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskEnvelope {
    v: u8,
    scan_id: String,
    target: String,
    scan_type: ScanType,
}

/// A payload that cannot be turned into a `ScanTask`.
///
/// `scan_id` is set whenever the id could still be read, so the failure can be
/// recorded against the right scan.
#[derive(Debug, Error)]
#[error("malformed task payload: {reason}")]
pub struct DecodeError {
    pub scan_id: Option<ScanId>,
    pub reason: String,
}

pub fn encode(task: &ScanTask) -> Result<String, serde_json::Error> {
    serde_json::to_string(&TaskEnvelope {
        v: WIRE_VERSION,
        scan_id: task.scan_id.0.clone(),
        target: task.target.clone(),
        scan_type: task.scan_type,
    })
}

pub fn decode(payload: &str) -> Result<ScanTask, DecodeError> {
    let payload = payload.trim();

    if payload.starts_with('{') {
        decode_envelope(payload)
    } else {
        decode_legacy(payload)
    }
}

fn decode_envelope(payload: &str) -> Result<ScanTask, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(payload).map_err(|e| DecodeError {
        scan_id: None,
        reason: e.to_string(),
    })?;

    let scan_id = value
        .get("scanId")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .map(|id| ScanId(id.to_string()));
    let fail = |reason: String| DecodeError {
        scan_id: scan_id.clone(),
        reason,
    };

    let envelope: TaskEnvelope =
        serde_json::from_value(value).map_err(|e| fail(e.to_string()))?;

    if envelope.v != WIRE_VERSION {
        return Err(fail(format!("unsupported payload version {}", envelope.v)));
    }
    if envelope.scan_id.is_empty() {
        return Err(fail("empty scan id".to_string()));
    }
    let target = validate_target(&envelope.target).map_err(fail)?;

    Ok(ScanTask::new(
        ScanId(envelope.scan_id),
        target,
        envelope.scan_type,
    ))
}

fn decode_legacy(payload: &str) -> Result<ScanTask, DecodeError> {
    let fields: Vec<&str> = payload.split(LEGACY_SEPARATOR).collect();

    let scan_id = fields
        .first()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| ScanId(id.to_string()));
    let fail = |reason: String| DecodeError {
        scan_id: scan_id.clone(),
        reason,
    };

    let [_, target, scan_type] = fields.as_slice() else {
        return Err(fail(format!(
            "expected 3 '{}'-separated fields, got {}",
            LEGACY_SEPARATOR,
            fields.len()
        )));
    };
    let Some(id) = scan_id.clone() else {
        return Err(fail("empty scan id".to_string()));
    };
    let scan_type: ScanType = scan_type.trim().parse().map_err(fail)?;
    let target = validate_target(target).map_err(fail)?;

    Ok(ScanTask::new(id, target, scan_type))
}
