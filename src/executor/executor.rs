//! Multi-source scan pipeline.
//!
//! Runs the three lookups concurrently and merges their outcomes into one
//! `CompositeResult`. The executor itself has no failure path: every source
//! failure becomes an error marker in its own slot.

use super::intel::HostIntelLookup;
use super::lookup::{run_lookup, Lookup};
use super::probe::NetworkProbe;
use super::vuln::VulnDbLookup;
use crate::config::ExecutorConfig;
use crate::scan::types::{CompositeResult, ScanType};

use std::sync::Arc;

pub struct ScanExecutor {
    probe: Arc<dyn Lookup>,
    host_intel: Arc<dyn Lookup>,
    vuln_db: Arc<dyn Lookup>,
}

impl ScanExecutor {
    pub fn new(
        probe: Arc<dyn Lookup>,
        host_intel: Arc<dyn Lookup>,
        vuln_db: Arc<dyn Lookup>,
    ) -> Arc<Self> {
        Arc::new(Self {
            probe,
            host_intel,
            vuln_db,
        })
    }

    /// Builds the production pipeline: the probe tool plus the Shodan and NVD
    /// APIs, sharing one HTTP client.
    pub fn from_config(config: &ExecutorConfig) -> Arc<Self> {
        let client = reqwest::Client::new();

        if config.shodan_api_key.is_none() {
            tracing::warn!("SHODAN_API_KEY is not set; host intel results will be errors");
        }
        if config.nvd_api_key.is_none() {
            tracing::warn!("NVD_API_KEY is not set; vulnerability results will be errors");
        }

        Self::new(
            Arc::new(NetworkProbe::new(
                config.probe_program.clone(),
                config.probe_timeout,
            )),
            Arc::new(HostIntelLookup::new(
                client.clone(),
                &config.shodan_base_url,
                config.shodan_api_key.clone(),
                config.api_timeout,
            )),
            Arc::new(VulnDbLookup::new(
                client,
                &config.nvd_base_url,
                config.nvd_api_key.clone(),
                config.nvd_results_per_page,
                config.api_timeout,
            )),
        )
    }

    pub async fn execute(&self, target: &str, scan_type: ScanType) -> CompositeResult {
        tracing::debug!("Executing {} scan of {}", scan_type, target);

        let (probe, host_intel, vuln_db) = tokio::join!(
            run_lookup(self.probe.clone(), target, scan_type),
            run_lookup(self.host_intel.clone(), target, scan_type),
            run_lookup(self.vuln_db.clone(), target, scan_type),
        );

        CompositeResult {
            probe,
            host_intel,
            vuln_db,
        }
    }
}
