use super::{codec, Delivery, QueueError, TaskQueue};
use crate::scan::types::ScanTask;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Sleep between polls of an empty queue.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifetime of a consumer claim that is not renewed.
pub const CONSUMER_TTL: Duration = Duration::from_secs(30);

/// Period of claim renewal and stale-consumer reaping.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Reliable queue on Redis lists.
///
/// Layout:
/// - `<queue>`: pending payloads. Producers `LPUSH`, consumers take from the right.
/// - `<queue>:processing:<consumer>`: payloads this consumer has received but not
///   acknowledged. `LMOVE` makes the hand-over atomic, so a message is always in
///   exactly one of the two lists.
///
/// - `<queue>:consumer:<consumer>`: the live claim on a consumer id, see `register`.
///
/// After a crash the processing list still holds the in-flight payloads. `recover`
/// pushes them back when the consumer restarts under the same id, and any other
/// consumer's `reap_stale` does so once the crashed consumer's claim expires.
pub struct RedisQueue {
    conn: ConnectionManager,
    queue_name: String,
    consumer_id: String,
    consumer_key: String,
    processing_prefix: String,
    processing_list: String,
    /// Distinguishes this process from an earlier one using the same consumer id.
    token: String,
    next_tag: AtomicU64,
}

impl RedisQueue {
    pub async fn connect(
        redis_url: &str,
        queue_name: &str,
        consumer_id: &str,
    ) -> Result<Self, QueueError> {
        tracing::info!("Connecting task queue '{}' to Redis at {}", queue_name, redis_url);

        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self::with_connection(conn, queue_name, consumer_id))
    }

    pub fn with_connection(conn: ConnectionManager, queue_name: &str, consumer_id: &str) -> Self {
        let processing_prefix = format!("{}:processing:", queue_name);
        Self {
            conn,
            queue_name: queue_name.to_string(),
            consumer_id: consumer_id.to_string(),
            consumer_key: consumer_key(queue_name, consumer_id),
            processing_list: format!("{}{}", processing_prefix, consumer_id),
            processing_prefix,
            token: uuid::Uuid::new_v4().to_string(),
            next_tag: AtomicU64::new(1),
        }
    }

    /// Claims this consumer id for the current process.
    ///
    /// The claim is a `<queue>:consumer:<id>` key holding a per-process token
    /// that expires unless renewed by `heartbeat`. Fails with `ConsumerInUse` while
    /// another live process holds the same id, so two processes never share a
    /// processing list.
    pub async fn register(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&self.consumer_key)
            .arg(&self.token)
            .arg("NX")
            .arg("PX")
            .arg(CONSUMER_TTL.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        if claimed.is_none() {
            return Err(QueueError::ConsumerInUse(self.consumer_id.clone()));
        }

        tracing::info!("Registered queue consumer {}", self.consumer_id);
        Ok(())
    }

    /// Renews the consumer claim taken by `register`.
    pub async fn heartbeat(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        let holder: Option<String> = redis::cmd("GET")
            .arg(&self.consumer_key)
            .query_async(&mut conn)
            .await?;
        if holder.as_deref().is_some_and(|holder| holder != self.token) {
            return Err(QueueError::ConsumerInUse(self.consumer_id.clone()));
        }

        let _: () = redis::cmd("SET")
            .arg(&self.consumer_key)
            .arg(&self.token)
            .arg("PX")
            .arg(CONSUMER_TTL.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Releases the consumer claim, if this process still holds it.
    pub async fn deregister(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        let holder: Option<String> = redis::cmd("GET")
            .arg(&self.consumer_key)
            .query_async(&mut conn)
            .await?;
        if holder.as_deref() == Some(self.token.as_str()) {
            let _: i64 = redis::cmd("DEL")
                .arg(&self.consumer_key)
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    /// Requeues everything left in this consumer's processing list.
    ///
    /// Call once on startup, after `register` and before receiving.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let recovered = self.drain(&self.processing_list).await?;

        if recovered > 0 {
            tracing::warn!(
                "Recovered {} unacknowledged tasks from {}",
                recovered,
                self.processing_list
            );
        }

        Ok(recovered)
    }

    /// Requeues the processing lists of consumers whose claim has expired.
    ///
    /// Those consumers crashed (or stalled past the claim TTL) and will not
    /// acknowledge their tasks, so the tasks are handed out again.
    pub async fn reap_stale(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}{}", self.processing_prefix, "*");
        let mut cursor: u64 = 0;
        let mut lists = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            lists.extend(batch);

            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut reaped = 0usize;
        for list in lists {
            if list == self.processing_list {
                continue;
            }
            let Some(consumer_id) = list.strip_prefix(&self.processing_prefix) else {
                continue;
            };

            let alive: bool = redis::cmd("EXISTS")
                .arg(consumer_key(&self.queue_name, consumer_id))
                .query_async(&mut conn)
                .await?;
            if alive {
                continue;
            }

            let moved = self.drain(&list).await?;
            if moved > 0 {
                tracing::warn!(
                    "Requeued {} tasks abandoned by consumer {}",
                    moved,
                    consumer_id
                );
            }
            reaped += moved;
        }

        Ok(reaped)
    }

    /// Keeps the consumer claim alive and reaps abandoned processing lists until
    /// `shutdown` is cancelled.
    pub fn spawn_maintenance(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if let Err(e) = self.heartbeat().await {
                    tracing::error!("Consumer heartbeat for {} failed: {}", self.consumer_id, e);
                }
                if let Err(e) = self.reap_stale().await {
                    tracing::warn!("Could not reap stale consumers: {}", e);
                }
            }
        })
    }

    /// Moves every payload of `list` back onto the pending list.
    async fn drain(&self, list: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let mut moved = 0usize;

        loop {
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(list)
                .arg(&self.queue_name)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;

            match payload {
                Some(_) => moved += 1,
                None => break,
            }
        }

        Ok(moved)
    }
}

fn consumer_key(queue_name: &str, consumer_id: &str) -> String {
    format!("{}:consumer:{}", queue_name, consumer_id)
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn publish(&self, task: &ScanTask) -> Result<(), QueueError> {
        let payload = codec::encode(task)?;
        let mut conn = self.conn.clone();

        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.queue_name)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        tracing::debug!("Published scan {} to '{}'", task.scan_id, self.queue_name);
        Ok(())
    }

    async fn receive(&self) -> Result<Delivery, QueueError> {
        let mut conn = self.conn.clone();

        loop {
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(&self.queue_name)
                .arg(&self.processing_list)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?;

            if let Some(payload) = payload {
                return Ok(Delivery {
                    tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
                    payload,
                    redelivered: false,
                });
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        let removed: i64 = redis::cmd("LREM")
            .arg(&self.processing_list)
            .arg(1)
            .arg(&delivery.payload)
            .query_async(&mut conn)
            .await?;

        if removed == 0 {
            return Err(QueueError::UnknownDelivery(delivery.tag));
        }
        Ok(())
    }

    async fn nack(&self, delivery: Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.processing_list)
            .arg(1)
            .arg(&delivery.payload)
            .ignore()
            .cmd("RPUSH")
            .arg(&self.queue_name)
            .arg(&delivery.payload)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!("Returned delivery {} to '{}'", delivery.tag, self.queue_name);
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();

        let len: usize = redis::cmd("LLEN")
            .arg(&self.queue_name)
            .query_async(&mut conn)
            .await?;

        Ok(len)
    }
}
