//! Scan Worker Module
//!
//! Consumes scan tasks and drives each one through
//! `Received -> Executing -> Finalized(Done | Error)`.
//!
//! Delivery is at-least-once, so processing is idempotent per scan id: running a
//! redelivered task again simply overwrites the terminal record with an equivalent
//! one. A delivery is acknowledged only after its outcome is in the registry.

pub mod worker;

pub use self::worker::{DeliveryOutcome, ScanWorker};
