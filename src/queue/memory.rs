use super::{codec, Delivery, QueueError, TaskQueue};
use crate::scan::types::{now_ms, ScanTask};

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// How long a delivery may stay unacknowledged before it is handed out again.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Upper bound on how long `receive` sleeps before re-checking expired leases.
const RECLAIM_INTERVAL: Duration = Duration::from_millis(100);

struct QueuedMessage {
    payload: String,
    redelivered: bool,
}

struct InFlight {
    payload: String,
    /// Timestamp (ms) after which the message is considered abandoned.
    lease_expires: u64,
}

/// Lease-based at-least-once queue held in process memory.
///
/// Messages do not survive a restart; use `RedisQueue` when producers and workers
/// run as separate processes.
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<QueuedMessage>>,
    in_flight: DashMap<u64, InFlight>,
    next_tag: AtomicU64,
    notify: Notify,
    lease: Duration,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            in_flight: DashMap::new(),
            next_tag: AtomicU64::new(1),
            notify: Notify::new(),
            lease,
        }
    }

    /// Enqueues a raw payload without encoding it.
    pub fn push_raw(&self, payload: impl Into<String>) {
        self.enqueue(QueuedMessage {
            payload: payload.into(),
            redelivered: false,
        });
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<QueuedMessage>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enqueue(&self, message: QueuedMessage) {
        self.pending().push_back(message);
        self.notify.notify_one();
    }

    fn lease_deadline(&self) -> u64 {
        now_ms() + self.lease.as_millis() as u64
    }

    /// Moves every in-flight message whose lease has expired back to the queue.
    fn reclaim_expired(&self) {
        let now = now_ms();
        let mut expired = Vec::new();

        self.in_flight.retain(|tag, entry| {
            if now > entry.lease_expires {
                expired.push((*tag, std::mem::take(&mut entry.payload)));
                false
            } else {
                true
            }
        });

        for (tag, payload) in expired {
            tracing::warn!("Lease expired for delivery {}, requeueing", tag);
            self.enqueue(QueuedMessage {
                payload,
                redelivered: true,
            });
        }
    }

    fn try_take(&self) -> Option<Delivery> {
        let message = self.pending().pop_front()?;
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);

        self.in_flight.insert(
            tag,
            InFlight {
                payload: message.payload.clone(),
                lease_expires: self.lease_deadline(),
            },
        );

        Some(Delivery {
            tag,
            payload: message.payload,
            redelivered: message.redelivered,
        })
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn publish(&self, task: &ScanTask) -> Result<(), QueueError> {
        let payload = codec::encode(task)?;
        self.push_raw(payload);
        tracing::debug!("Queued scan {} in memory", task.scan_id);
        Ok(())
    }

    async fn receive(&self) -> Result<Delivery, QueueError> {
        loop {
            self.reclaim_expired();

            // Register interest before checking so a concurrent publish is not missed.
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_take() {
                tracing::trace!("Handing out delivery {}", delivery.tag);
                return Ok(delivery);
            }

            let _ = tokio::time::timeout(RECLAIM_INTERVAL, notified).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        match self.in_flight.remove(&delivery.tag) {
            Some(_) => Ok(()),
            None => Err(QueueError::UnknownDelivery(delivery.tag)),
        }
    }

    async fn nack(&self, delivery: Delivery) -> Result<(), QueueError> {
        let (_, entry) = self
            .in_flight
            .remove(&delivery.tag)
            .ok_or(QueueError::UnknownDelivery(delivery.tag))?;

        self.enqueue(QueuedMessage {
            payload: entry.payload,
            redelivered: true,
        });
        Ok(())
    }

    async fn renew(&self, delivery: &Delivery) -> Result<(), QueueError> {
        match self.in_flight.get_mut(&delivery.tag) {
            Some(mut entry) => {
                entry.lease_expires = self.lease_deadline();
                Ok(())
            }
            None => Err(QueueError::UnknownDelivery(delivery.tag)),
        }
    }

    async fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.pending().len())
    }
}
