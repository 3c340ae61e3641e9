use super::lookup::{fetch_json, require_credential, Lookup, LookupError};
use crate::scan::types::ScanType;

use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_NVD_BASE_URL: &str = "https://services.nvd.nist.gov";
pub const DEFAULT_RESULTS_PER_PAGE: u32 = 3;

/// NVD CVE query: `GET {base}/rest/json/cves/2.0?apiKey={key}&resultsPerPage={n}`.
///
/// The query is not keyed by the target; it returns the latest page of CVEs.
pub struct VulnDbLookup {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    results_per_page: u32,
    timeout: Duration,
}

impl VulnDbLookup {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        results_per_page: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            results_per_page,
            timeout,
        }
    }
}

#[async_trait]
impl Lookup for VulnDbLookup {
    fn name(&self) -> &'static str {
        "vuln-db"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(
        &self,
        _target: &str,
        _scan_type: ScanType,
    ) -> Result<serde_json::Value, LookupError> {
        let key = require_credential(&self.api_key)?;
        let url = format!("{}/rest/json/cves/2.0", self.base_url);
        let page_size = self.results_per_page.to_string();

        fetch_json(
            self.client
                .get(url)
                .query(&[("apiKey", key), ("resultsPerPage", page_size.as_str())])
                .timeout(self.timeout),
        )
        .await
    }
}
