//! Scan Module
//!
//! The client-facing side of the system: accepting scan requests and answering
//! status queries.
//!
//! ## Architecture
//! A submission never waits for the scan itself:
//! 1. **Validate**: the target must be an IP address or hostname.
//! 2. **Register**: a `Pending` record is written to the `ScanRegistry`.
//! 3. **Publish**: a `ScanTask` is pushed onto the `TaskQueue`; a worker picks it up later.
//!
//! Clients then poll the `StatusService` until the record is `done` or `error`.
//!
//! ## Submodules
//! - **`types`**: the data model shared by every other module (ids, tasks, records).
//! - **`producer`**: `ScanProducer::submit`.
//! - **`status`**: `StatusService`, the read-only view of the registry.
//! - **`protocol`** / **`handlers`**: the HTTP API built on axum.

pub mod handlers;
pub mod producer;
pub mod protocol;
pub mod status;
pub mod types;

pub use self::producer::ScanProducer;
pub use self::status::StatusService;
