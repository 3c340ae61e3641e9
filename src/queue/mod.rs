//! Task Queue Module
//!
//! The durable, at-least-once channel between the producer and the workers.
//!
//! ## Delivery Model
//! 1. **Publish**: the producer encodes a `ScanTask` (see `codec`) and pushes it.
//! 2. **Receive**: a worker pulls the next message. The message is now *in flight*:
//!    it is no longer visible to other consumers but is not gone either.
//! 3. **Ack**: once the outcome is recorded in the registry, the worker acknowledges
//!    the delivery and the message is removed for good.
//! 4. **Redelivery**: a delivery that is nacked, whose lease expires (in-memory), or
//!    that is left in a crashed consumer's processing list (Redis) is handed out
//!    again. A Redis consumer recovers its own list on restart; lists of consumers
//!    whose claim expired are reaped by any live consumer. Consumers must therefore
//!    be idempotent per scan id.
//!
//! No ordering is guaranteed between tasks.
//!
//! ## Submodules
//! - **`codec`**: the versioned wire format of a task.
//! - **`memory`**: lease-based queue for single-process deployments and tests.
//! - **`redis`**: reliable queue on Redis lists with per-consumer processing lists.

pub mod codec;
pub mod memory;
pub mod redis;

use crate::scan::types::ScanTask;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use thiserror::Error;

pub use self::memory::InMemoryQueue;
pub use self::redis::RedisQueue;

/// Default queue name, shared by producers and workers.
pub const DEFAULT_QUEUE_NAME: &str = "scan_tasks";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue broker unavailable: {0}")]
    Unavailable(String),

    #[error("consumer id '{0}' is held by another live process")]
    ConsumerInUse(String),

    #[error("unknown or expired delivery {0}")]
    UnknownDelivery(u64),

    #[error("failed to encode task: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<::redis::RedisError> for QueueError {
    fn from(err: ::redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

/// A message handed to a consumer and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue-local handle used for ack/nack/renew.
    pub tag: u64,
    /// The raw wire payload. Decoding is the consumer's job so that a malformed
    /// payload can still be acknowledged.
    pub payload: String,
    /// Whether this payload was handed out before.
    pub redelivered: bool,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Encodes and durably enqueues a task.
    async fn publish(&self, task: &ScanTask) -> Result<(), QueueError>;

    /// Waits for the next message and marks it in flight.
    async fn receive(&self) -> Result<Delivery, QueueError>;

    /// Removes an in-flight message permanently.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Returns an in-flight message to the queue for redelivery.
    async fn nack(&self, delivery: Delivery) -> Result<(), QueueError>;

    /// Extends the in-flight lease of a delivery, for queues that have one.
    async fn renew(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    /// Number of messages waiting to be received.
    async fn pending_count(&self) -> Result<usize, QueueError>;
}

/// Turns a queue into an endless stream of deliveries.
///
/// Errors are yielded rather than ending the stream, so a consumer can back off and
/// keep polling across a broker disconnect.
pub fn consume(queue: Arc<dyn TaskQueue>) -> BoxStream<'static, Result<Delivery, QueueError>> {
    stream::unfold(queue, |queue| async move {
        let next = queue.receive().await;
        Some((next, queue))
    })
    .boxed()
}

#[cfg(test)]
mod tests;
