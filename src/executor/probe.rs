use super::lookup::{Lookup, LookupError};
use crate::scan::types::ScanType;

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

pub const DEFAULT_PROBE_PROGRAM: &str = "nmap";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the local network scanning tool against the target.
///
/// Succeeds with `{"raw": stdout}`. A spawn failure or a non-zero exit becomes a
/// `Process` error carrying stderr. The child is killed if the lookup times out.
pub struct NetworkProbe {
    program: String,
    fixed_args: Option<Vec<String>>,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            fixed_args: None,
            timeout,
        }
    }

    /// Replaces the per-scan-type arguments with a fixed list.
    pub fn with_fixed_args(mut self, args: Vec<String>) -> Self {
        self.fixed_args = Some(args);
        self
    }

    fn args(&self, scan_type: ScanType) -> Vec<String> {
        match &self.fixed_args {
            Some(args) => args.clone(),
            None => scan_type
                .probe_args()
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
        }
    }
}

#[async_trait]
impl Lookup for NetworkProbe {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(
        &self,
        target: &str,
        scan_type: ScanType,
    ) -> Result<serde_json::Value, LookupError> {
        let args = self.args(scan_type);
        tracing::debug!("Running {} {:?} {}", self.program, args, target);

        let output = Command::new(&self.program)
            .args(&args)
            .arg(target)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LookupError::Process(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LookupError::Process(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(serde_json::json!({ "raw": raw }))
    }
}
