//! Asynchronous Scan Orchestration Library
//!
//! Accepts network scan requests over HTTP, queues them durably and lets a pool of
//! workers run each scan against three independent sources. Clients poll for the
//! merged result. The binary (`main.rs`) wires these modules into a `serve` and a
//! `worker` command.
//!
//! ## Architecture Modules
//! - **`scan`**: the data model, the producer that accepts requests, the status
//!   service and the HTTP API.
//! - **`queue`**: the at-least-once task queue (in-memory or Redis) and its wire codec.
//! - **`registry`**: the keyed store of scan records (in-memory or Redis). The only
//!   shared mutable state between producers and workers.
//! - **`executor`**: runs the network probe and the host-intel and vulnerability
//!   lookups concurrently, each in its own failure domain.
//! - **`worker`**: consumes tasks, executes them and records the outcome before
//!   acknowledging.
//! - **`config`** / **`error`**: command-line and environment configuration, and
//!   the errors surfaced to API callers.

pub mod config;
pub mod error;
pub mod executor;
pub mod queue;
pub mod registry;
pub mod scan;
pub mod worker;
