//! Worker Pool Implementation
//!
//! Spawns `worker_count` independent loops that pull deliveries from the
//! `TaskQueue`, run them through the `ScanExecutor` and record the outcome.
//!
//! ## Responsibilities
//! - **Consuming**: each loop reads from `queue::consume`, backing off with jitter when
//!   the broker is unreachable.
//! - **Lease Management**: a sidecar task renews the delivery lease while a scan runs.
//! - **Finalizing**: the registry is written before the delivery is acknowledged. A
//!   failed registry write nacks the delivery instead.

use crate::executor::ScanExecutor;
use crate::queue::codec::{self, DecodeError};
use crate::queue::{self, Delivery, QueueError, TaskQueue};
use crate::registry::{RegistryError, ScanRegistry};
use crate::scan::types::{ScanId, ScanRecord, ScanState, ScanStatus, ScanTask};

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lease renewal period while a scan runs (the in-memory lease is 30 s).
pub const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(10);

const BACKOFF_START_MS: u64 = 150;
const BACKOFF_MAX_MS: u64 = 1200;

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Recorded as `Done` or `Error` and acknowledged.
    Finalized(ScanId, ScanStatus),
    /// The payload names no pending scan; acknowledged without touching the registry.
    Discarded,
    /// The outcome could not be recorded; handed back for redelivery.
    Requeued,
}

pub struct ScanWorker {
    queue: Arc<dyn TaskQueue>,
    registry: Arc<dyn ScanRegistry>,
    executor: Arc<ScanExecutor>,
    worker_count: usize,
    renew_interval: Duration,
}

impl ScanWorker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: Arc<dyn ScanRegistry>,
        executor: Arc<ScanExecutor>,
        worker_count: usize,
    ) -> Self {
        Self {
            queue,
            registry,
            executor,
            worker_count,
            renew_interval: LEASE_RENEW_INTERVAL,
        }
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    /// Spawns the worker loops and returns their handles. The loops exit once
    /// `shutdown` is cancelled, after finishing the delivery in hand.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        tracing::info!("Starting {} scan workers", self.worker_count);

        (0..self.worker_count)
            .map(|worker_id| {
                let worker = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    worker.worker_loop(worker_id, shutdown).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        tracing::info!("Worker {} started", worker_id);

        let mut deliveries = queue::consume(self.queue.clone());
        let mut delay_ms = BACKOFF_START_MS;

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    delay_ms = BACKOFF_START_MS;
                    tracing::trace!("Worker {} received delivery {}", worker_id, delivery.tag);

                    if let Err(e) = self.process_delivery(delivery).await {
                        tracing::error!("Worker {} failed to settle a delivery: {}", worker_id, e);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("Worker {} cannot receive tasks: {}", worker_id, e);

                    let jitter = rand::random::<u64>() % 50;
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms + jitter)) => {}
                    }
                    delay_ms = (delay_ms * 2).min(BACKOFF_MAX_MS);
                }
                None => break,
            }
        }

        tracing::info!("Worker {} stopped", worker_id);
    }

    /// Receives one delivery and processes it.
    pub async fn run_once(&self) -> Result<DeliveryOutcome, QueueError> {
        let delivery = self.queue.receive().await?;
        self.process_delivery(delivery).await
    }

    /// Decodes, executes, records and settles a single delivery.
    pub async fn process_delivery(
        &self,
        delivery: Delivery,
    ) -> Result<DeliveryOutcome, QueueError> {
        let record = match codec::decode(&delivery.payload) {
            Ok(task) => self.execute_with_lease(&delivery, task).await,
            Err(e) => match self.malformed_record(&e).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::warn!("Dropping delivery {}: {}", delivery.tag, e);
                    self.queue.ack(&delivery).await?;
                    return Ok(DeliveryOutcome::Discarded);
                }
                Err(registry_error) => {
                    tracing::error!(
                        "Cannot look up the scan of malformed delivery {}: {}",
                        delivery.tag,
                        registry_error
                    );
                    self.queue.nack(delivery).await?;
                    return Ok(DeliveryOutcome::Requeued);
                }
            },
        };

        let scan_id = record.scan_id.clone();
        let status = record.status();

        if let Err(e) = self.registry.finalize(record).await {
            tracing::error!("Failed to record outcome of scan {}: {}", scan_id, e);
            self.queue.nack(delivery).await?;
            return Ok(DeliveryOutcome::Requeued);
        }

        self.queue.ack(&delivery).await?;
        tracing::info!("Scan {} finished with status {}", scan_id, status);

        Ok(DeliveryOutcome::Finalized(scan_id, status))
    }

    /// Runs the scan while a sidecar task keeps the delivery leased.
    async fn execute_with_lease(&self, delivery: &Delivery, task: ScanTask) -> ScanRecord {
        if delivery.redelivered {
            tracing::info!("Scan {} was redelivered; running it again", task.scan_id);
        }
        tracing::info!(
            "Executing scan {} ({} scan of {})",
            task.scan_id,
            task.scan_type,
            task.target
        );

        let renewal_handle = self.spawn_lease_renewal(delivery);

        let executor = self.executor.clone();
        let target = task.target.clone();
        let scan_type = task.scan_type;
        let run = tokio::spawn(async move { executor.execute(&target, scan_type).await });

        let state = match run.await {
            Ok(composite) => ScanState::Done(composite),
            Err(e) => {
                tracing::error!("Scan {} aborted: {}", task.scan_id, e);
                ScanState::Error(format!("scan execution failed: {}", e))
            }
        };

        renewal_handle.abort();

        ScanRecord::with_state(&task, state)
    }

    fn spawn_lease_renewal(&self, delivery: &Delivery) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let delivery = delivery.clone();
        let interval = self.renew_interval;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match queue.renew(&delivery).await {
                    Ok(_) => {
                        tracing::trace!("Renewed lease for delivery {}", delivery.tag);
                    }
                    Err(e) => {
                        tracing::debug!("Stopped renewing delivery {}: {}", delivery.tag, e);
                        break;
                    }
                }
            }
        })
    }

    /// The `Error` record for a payload that could not be decoded.
    ///
    /// Only a scan that is registered and still pending is failed. A payload
    /// without a readable id, or naming a scan the registry does not know or has
    /// already finished, yields `None` and leaves the registry untouched.
    async fn malformed_record(
        &self,
        error: &DecodeError,
    ) -> Result<Option<ScanRecord>, RegistryError> {
        let Some(scan_id) = error.scan_id.clone() else {
            return Ok(None);
        };

        let Some(existing) = self.registry.get(&scan_id).await? else {
            tracing::warn!("Malformed task names unknown scan {}", scan_id);
            return Ok(None);
        };
        if existing.state.is_terminal() {
            tracing::debug!("Malformed task for finished scan {}", scan_id);
            return Ok(None);
        }

        tracing::warn!("Scan {} has a malformed task: {}", scan_id, error.reason);
        Ok(Some(ScanRecord::with_state(
            &ScanTask::new(scan_id, existing.target, existing.scan_type),
            ScanState::Error(error.to_string()),
        )))
    }
}
