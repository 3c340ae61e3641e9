use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

/// RFC 1123 hostname: dot-separated labels of alphanumerics and inner hyphens.
static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.?$")
        .expect("hostname pattern compiles")
});

/// Unique identifier for a scan.
///
/// Wrapper around a UUID v4 string. The same identifier keys the registry record,
/// the queued task and every log line about the scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ScanId(pub String);

impl ScanId {
    /// Generates a new random UUID v4-based ScanId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The flavour of network probe to run against a target.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    /// Service and version detection on the default port set.
    #[default]
    Basic,
    /// Top ports only.
    Quick,
    /// Service detection on every TCP port.
    Full,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Basic => "basic",
            ScanType::Quick => "quick",
            ScanType::Full => "full",
        }
    }

    /// Arguments handed to the probe tool before the target.
    pub fn probe_args(&self) -> &'static [&'static str] {
        match self {
            ScanType::Basic => &["-sV"],
            ScanType::Quick => &["-F"],
            ScanType::Full => &["-sV", "-p-"],
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(ScanType::Basic),
            "quick" => Ok(ScanType::Quick),
            "full" => Ok(ScanType::Full),
            other => Err(format!("unknown scan type '{}'", other)),
        }
    }
}

/// A client's request to scan one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub target: String,
    pub scan_type: ScanType,
}

impl ScanRequest {
    pub fn new(target: impl Into<String>, scan_type: ScanType) -> Self {
        Self {
            target: target.into(),
            scan_type,
        }
    }
}

/// Checks that `target` names a single host and returns it trimmed.
///
/// Accepts IPv4/IPv6 literals and hostnames. Anything else (empty strings,
/// whitespace, leading `-`) is rejected so it can never reach the probe tool's
/// argument list as a flag.
pub fn validate_target(target: &str) -> Result<&str, String> {
    let target = target.trim();

    if target.is_empty() {
        return Err("target must not be empty".to_string());
    }
    if target.parse::<IpAddr>().is_ok() || HOSTNAME_RE.is_match(target) {
        return Ok(target);
    }

    Err(format!("'{}' is not an IP address or hostname", target))
}

/// The durable unit of work placed on the task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    pub scan_id: ScanId,
    pub target: String,
    pub scan_type: ScanType,
}

impl ScanTask {
    pub fn new(scan_id: ScanId, target: impl Into<String>, scan_type: ScanType) -> Self {
        Self {
            scan_id,
            target: target.into(),
            scan_type,
        }
    }
}

/// Externally visible status of a scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Done,
    Error,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Done => "done",
            ScanStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Outcome of one sub-lookup.
///
/// Serialized as `{"ok": payload}` or `{"error": "description"}`, so an
/// unavailable source is never confused with one that found nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SourceResult {
    Ok(serde_json::Value),
    Error(String),
}

impl SourceResult {
    pub fn error(message: impl Into<String>) -> Self {
        SourceResult::Error(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, SourceResult::Ok(_))
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            SourceResult::Ok(value) => Some(value),
            SourceResult::Error(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            SourceResult::Ok(_) => None,
            SourceResult::Error(message) => Some(message),
        }
    }
}

/// Merged output of the three sub-lookups. Every slot is always populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResult {
    pub probe: SourceResult,
    pub host_intel: SourceResult,
    pub vuln_db: SourceResult,
}

/// Lifecycle state of a scan. Pending moves to Done or Error exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "result", rename_all = "lowercase")]
pub enum ScanState {
    Pending,
    Done(CompositeResult),
    Error(String),
}

impl ScanState {
    pub fn status(&self) -> ScanStatus {
        match self {
            ScanState::Pending => ScanStatus::Pending,
            ScanState::Done(_) => ScanStatus::Done,
            ScanState::Error(_) => ScanStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanState::Pending)
    }

    /// Client view of the result: `None` while pending, the composite when
    /// done, `{"error": cause}` when failed.
    pub fn result_json(&self) -> Option<serde_json::Value> {
        match self {
            ScanState::Pending => None,
            ScanState::Done(composite) => serde_json::to_value(composite).ok(),
            ScanState::Error(cause) => Some(serde_json::json!({ "error": cause })),
        }
    }
}

/// The registry entry for one scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub scan_id: ScanId,
    pub target: String,
    pub scan_type: ScanType,
    pub state: ScanState,
    /// Timestamp (ms) when the scan was submitted.
    pub created_at: u64,
    /// Timestamp (ms) of the last state change.
    pub updated_at: u64,
}

impl ScanRecord {
    /// The record the producer writes before publishing `task`.
    pub fn pending(task: &ScanTask) -> Self {
        Self::with_state(task, ScanState::Pending)
    }

    pub fn with_state(task: &ScanTask, state: ScanState) -> Self {
        let now = now_ms();
        Self {
            scan_id: task.scan_id.clone(),
            target: task.target.clone(),
            scan_type: task.scan_type,
            state,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.state.status()
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
