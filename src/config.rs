//! Runtime configuration.
//!
//! Every flag has an environment variable fallback, and `main` loads a `.env`
//! file (if present) before parsing. Credentials and the broker URL are
//! optional: without `REDIS_URL` the server runs the in-memory queue and registry
//! with embedded workers, and a missing API key only degrades that source's
//! sub-result.

use crate::executor::intel::{DEFAULT_API_TIMEOUT, DEFAULT_SHODAN_BASE_URL};
use crate::executor::probe::{DEFAULT_PROBE_PROGRAM, DEFAULT_PROBE_TIMEOUT};
use crate::executor::vuln::{DEFAULT_NVD_BASE_URL, DEFAULT_RESULTS_PER_PAGE};
use crate::queue::DEFAULT_QUEUE_NAME;
use crate::registry::redis::DEFAULT_KEY_PREFIX;

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "scan-orchestrator",
    version,
    about = "Asynchronous multi-source network scan service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API (and, optionally, embedded workers).
    Serve(ServeArgs),
    /// Run a standalone worker that consumes scan tasks from the broker.
    Worker(WorkerArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address of the HTTP listener.
    #[arg(long, env = "SCAN_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Workers to run inside the server process. Forced to at least one when no
    /// broker is configured.
    #[arg(long, env = "SCAN_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Queue consumer id of the embedded workers. Defaults to `serve-<uuid>`,
    /// fresh on every start.
    #[arg(long, env = "SCAN_CONSUMER_ID")]
    pub consumer_id: Option<String>,

    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub executor: ExecutorArgs,
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Concurrent worker loops in this process.
    #[arg(long, env = "SCAN_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Names this process's processing list. Must be unique among live
    /// consumers; reuse it across restarts to recover in-flight tasks at once.
    #[arg(long, env = "SCAN_CONSUMER_ID")]
    pub consumer_id: String,

    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub executor: ExecutorArgs,
}

#[derive(Debug, Args)]
pub struct BrokerArgs {
    /// Redis URL for the task queue and the scan registry.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "SCAN_QUEUE", default_value = DEFAULT_QUEUE_NAME)]
    pub queue_name: String,

    /// Prefix of the registry keys (`<prefix>:<scan id>`).
    #[arg(long, env = "SCAN_KEY_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    pub key_prefix: String,

}

#[derive(Debug, Args)]
pub struct ExecutorArgs {
    #[arg(long, env = "SHODAN_API_KEY", hide_env_values = true)]
    pub shodan_api_key: Option<String>,

    #[arg(long, env = "NVD_API_KEY", hide_env_values = true)]
    pub nvd_api_key: Option<String>,

    /// Network probe executable.
    #[arg(long, env = "NMAP_PATH", default_value = DEFAULT_PROBE_PROGRAM)]
    pub probe_program: String,

    #[arg(long, env = "SCAN_PROBE_TIMEOUT_SECS", default_value_t = DEFAULT_PROBE_TIMEOUT.as_secs())]
    pub probe_timeout_secs: u64,

    #[arg(long, env = "SCAN_API_TIMEOUT_SECS", default_value_t = DEFAULT_API_TIMEOUT.as_secs())]
    pub api_timeout_secs: u64,

    #[arg(long, env = "NVD_RESULTS_PER_PAGE", default_value_t = DEFAULT_RESULTS_PER_PAGE)]
    pub nvd_results_per_page: u32,

    #[arg(long, env = "SHODAN_BASE_URL", default_value = DEFAULT_SHODAN_BASE_URL)]
    pub shodan_base_url: String,

    #[arg(long, env = "NVD_BASE_URL", default_value = DEFAULT_NVD_BASE_URL)]
    pub nvd_base_url: String,
}

impl ServeArgs {
    pub fn consumer_id(&self) -> String {
        self.consumer_id
            .clone()
            .unwrap_or_else(|| format!("serve-{}", uuid::Uuid::new_v4()))
    }
}

impl ExecutorArgs {
    pub fn to_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            shodan_api_key: self.shodan_api_key.clone(),
            nvd_api_key: self.nvd_api_key.clone(),
            probe_program: self.probe_program.clone(),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            api_timeout: Duration::from_secs(self.api_timeout_secs),
            nvd_results_per_page: self.nvd_results_per_page,
            shodan_base_url: self.shodan_base_url.clone(),
            nvd_base_url: self.nvd_base_url.clone(),
        }
    }
}

/// Settings of the scan pipeline, independent of how they were loaded.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub shodan_api_key: Option<String>,
    pub nvd_api_key: Option<String>,
    pub probe_program: String,
    pub probe_timeout: Duration,
    pub api_timeout: Duration,
    pub nvd_results_per_page: u32,
    pub shodan_base_url: String,
    pub nvd_base_url: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shodan_api_key: None,
            nvd_api_key: None,
            probe_program: DEFAULT_PROBE_PROGRAM.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            api_timeout: DEFAULT_API_TIMEOUT,
            nvd_results_per_page: DEFAULT_RESULTS_PER_PAGE,
            shodan_base_url: DEFAULT_SHODAN_BASE_URL.to_string(),
            nvd_base_url: DEFAULT_NVD_BASE_URL.to_string(),
        }
    }
}
