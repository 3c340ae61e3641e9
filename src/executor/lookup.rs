//! The seam between the executor and a single data source.

use crate::scan::types::{ScanType, SourceResult};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Message reported when a source needs a credential that is not configured.
pub const MISSING_CREDENTIAL: &str = "No API key set";

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{}", MISSING_CREDENTIAL)]
    MissingCredential,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Process(String),

    #[error("lookup aborted: {0}")]
    Aborted(String),
}

/// One independent source of findings about a target.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Budget for a single `lookup` call.
    fn timeout(&self) -> Duration;

    async fn lookup(
        &self,
        target: &str,
        scan_type: ScanType,
    ) -> Result<serde_json::Value, LookupError>;
}

/// Runs `lookup` in its own task under its own timeout and folds every failure,
/// panics included, into an error marker.
pub async fn run_lookup(lookup: Arc<dyn Lookup>, target: &str, scan_type: ScanType) -> SourceResult {
    let name = lookup.name();
    let limit = lookup.timeout();
    let owned_target = target.to_string();

    let handle = tokio::spawn(async move {
        match tokio::time::timeout(limit, lookup.lookup(&owned_target, scan_type)).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout(limit)),
        }
    });

    let outcome = match handle.await {
        Ok(result) => result,
        Err(join_error) => Err(LookupError::Aborted(join_error.to_string())),
    };

    match outcome {
        Ok(payload) => {
            tracing::debug!("{} lookup for {} succeeded", name, target);
            SourceResult::Ok(payload)
        }
        Err(err) => {
            tracing::warn!("{} lookup for {} failed: {}", name, target, err);
            SourceResult::Error(err.to_string())
        }
    }
}

/// Sends a GET request and parses a JSON body, turning a non-2xx response into
/// `LookupError::Status` carrying the response body.
pub(crate) async fn fetch_json(
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value, LookupError> {
    let response = request.send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LookupError::Status {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response.json().await?)
}

/// Returns the credential if it is set and non-blank.
pub(crate) fn require_credential(key: &Option<String>) -> Result<&str, LookupError> {
    key.as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(LookupError::MissingCredential)
}
