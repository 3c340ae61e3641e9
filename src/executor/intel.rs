use super::lookup::{fetch_json, require_credential, Lookup, LookupError};
use crate::scan::types::ScanType;

use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_SHODAN_BASE_URL: &str = "https://api.shodan.io";
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(10);

/// Shodan host lookup: `GET {base}/shodan/host/{target}?key={api_key}`.
pub struct HostIntelLookup {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HostIntelLookup {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl Lookup for HostIntelLookup {
    fn name(&self) -> &'static str {
        "host-intel"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(
        &self,
        target: &str,
        _scan_type: ScanType,
    ) -> Result<serde_json::Value, LookupError> {
        let key = require_credential(&self.api_key)?;
        let url = format!("{}/shodan/host/{}", self.base_url, target);

        fetch_json(
            self.client
                .get(url)
                .query(&[("key", key)])
                .timeout(self.timeout),
        )
        .await
    }
}
