//! Scan Executor Module
//!
//! Runs one scan against one target by querying three independent sources and
//! merging their outcomes.
//!
//! ## Sources
//! - **`probe`**: the local network scanning tool (`nmap`), run as a child process.
//! - **`intel`**: host intelligence from the Shodan host API.
//! - **`vuln`**: recent CVEs from the NVD API.
//!
//! Each source sits behind the `Lookup` trait and runs in its own task with its own
//! timeout (30 s for the probe, 10 s for the APIs). A missing credential, timeout,
//! non-2xx answer, process failure or panic only turns that one slot of the
//! `CompositeResult` into `{"error": ...}`.

pub mod executor;
pub mod intel;
pub mod lookup;
pub mod probe;
pub mod vuln;

pub use self::executor::ScanExecutor;
pub use self::lookup::{Lookup, LookupError, MISSING_CREDENTIAL};
