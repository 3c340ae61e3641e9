//! Queue Module Tests
//!
//! ## Test Scopes
//! - **Codec**: structured payloads keep every field, legacy payloads still decode,
//!   malformed payloads report what they can.
//! - **InMemoryQueue**: ack/nack/lease semantics behind the at-least-once guarantee.
//! - **RedisQueue**: the same guarantee on Redis lists, plus consumer claims and
//!   reaping. These tests need a server at `REDIS_URL` and return early without one.

#[cfg(test)]
mod tests {
    use crate::queue::codec::{self, WIRE_VERSION};
    use crate::queue::{consume, InMemoryQueue, QueueError, RedisQueue, TaskQueue};
    use crate::scan::types::{ScanId, ScanTask, ScanType};
    use futures::StreamExt;
    use redis::aio::ConnectionManager;
    use std::sync::Arc;
    use std::time::Duration;

    fn task(target: &str) -> ScanTask {
        ScanTask::new(ScanId::new(), target, ScanType::Basic)
    }

    // ============================================================
    // CODEC
    // ============================================================

    #[test]
    fn test_encoded_payload_is_versioned_envelope() {
        let task = ScanTask::new(ScanId("abc".to_string()), "10.0.0.5", ScanType::Full);

        let payload = codec::encode(&task).unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(json["v"], WIRE_VERSION);
        assert_eq!(json["scanId"], "abc");
        assert_eq!(json["target"], "10.0.0.5");
        assert_eq!(json["scanType"], "full");
        assert_eq!(codec::decode(&payload).unwrap(), task);
    }

    #[test]
    fn test_decode_legacy_pipe_payload() {
        let decoded = codec::decode("scan-1|192.168.1.100|basic").unwrap();

        assert_eq!(decoded.scan_id, ScanId("scan-1".to_string()));
        assert_eq!(decoded.target, "192.168.1.100");
        assert_eq!(decoded.scan_type, ScanType::Basic);
    }

    #[test]
    fn test_legacy_payload_with_extra_field_keeps_scan_id() {
        let err = codec::decode("scan-2|10.0.0.1|basic|extra").unwrap_err();

        assert_eq!(err.scan_id, Some(ScanId("scan-2".to_string())));
        assert!(err.reason.contains("expected 3"));
    }

    #[test]
    fn test_envelope_with_unknown_scan_type_keeps_scan_id() {
        let payload = r#"{"v":1,"scanId":"scan-3","target":"10.0.0.1","scanType":"stealth"}"#;

        let err = codec::decode(payload).unwrap_err();

        assert_eq!(err.scan_id, Some(ScanId("scan-3".to_string())));
    }

    #[test]
    fn test_envelope_with_flag_like_target_is_rejected() {
        let payload = r#"{"v":1,"scanId":"scan-4","target":"-oN /tmp/x","scanType":"basic"}"#;

        let err = codec::decode(payload).unwrap_err();

        assert_eq!(err.scan_id, Some(ScanId("scan-4".to_string())));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let payload = r#"{"v":9,"scanId":"scan-5","target":"10.0.0.1","scanType":"basic"}"#;

        let err = codec::decode(payload).unwrap_err();

        assert!(err.reason.contains("version"));
        assert_eq!(err.scan_id, Some(ScanId("scan-5".to_string())));
    }

    #[test]
    fn test_garbage_payload_has_no_scan_id() {
        let err = codec::decode("{not json").unwrap_err();

        assert!(err.scan_id.is_none());
    }

    // ============================================================
    // IN-MEMORY QUEUE
    // ============================================================

    #[tokio::test]
    async fn test_publish_receive_ack() {
        let queue = InMemoryQueue::new();
        let task = task("10.0.0.5");

        queue.publish(&task).await.unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        let delivery = queue.receive().await.unwrap();
        assert!(!delivery.redelivered);
        assert_eq!(codec::decode(&delivery.payload).unwrap(), task);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert_eq!(queue.in_flight_count(), 1);

        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_double_ack_fails() {
        let queue = InMemoryQueue::new();
        queue.publish(&task("10.0.0.5")).await.unwrap();
        let delivery = queue.receive().await.unwrap();

        queue.ack(&delivery).await.unwrap();
        let second = queue.ack(&delivery).await;

        assert!(matches!(second, Err(QueueError::UnknownDelivery(_))));
    }

    #[tokio::test]
    async fn test_nack_redelivers() {
        let queue = InMemoryQueue::new();
        queue.publish(&task("10.0.0.5")).await.unwrap();

        let first = queue.receive().await.unwrap();
        let payload = first.payload.clone();
        queue.nack(first).await.unwrap();

        let second = queue.receive().await.unwrap();
        assert!(second.redelivered);
        assert_eq!(second.payload, payload);
    }

    #[tokio::test]
    async fn test_expired_lease_redelivers_unacked_message() {
        // ARRANGE: short lease, consumer "crashes" without acking
        let queue = InMemoryQueue::with_lease(Duration::from_millis(50));
        queue.publish(&task("10.0.0.5")).await.unwrap();
        let abandoned = queue.receive().await.unwrap();

        // ACT
        tokio::time::sleep(Duration::from_millis(120)).await;
        let redelivered = tokio::time::timeout(Duration::from_secs(2), queue.receive())
            .await
            .expect("message should be redelivered")
            .unwrap();

        // ASSERT
        assert!(redelivered.redelivered);
        assert_eq!(redelivered.payload, abandoned.payload);
        assert_ne!(redelivered.tag, abandoned.tag);
        assert!(queue.ack(&abandoned).await.is_err());
        queue.ack(&redelivered).await.unwrap();
    }

    #[tokio::test]
    async fn test_renew_keeps_lease_alive() {
        let queue = InMemoryQueue::with_lease(Duration::from_millis(200));
        queue.publish(&task("10.0.0.5")).await.unwrap();
        let delivery = queue.receive().await.unwrap();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            queue.renew(&delivery).await.unwrap();
        }

        let nothing = tokio::time::timeout(Duration::from_millis(50), queue.receive()).await;
        assert!(nothing.is_err(), "renewed delivery must not be handed out again");
        queue.ack(&delivery).await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let queue = Arc::new(InMemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.publish(&task("scanme.example.org")).await.unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .expect("consumer should wake up")
            .unwrap()
            .unwrap();

        assert_eq!(codec::decode(&delivery.payload).unwrap().target, "scanme.example.org");
    }

    #[tokio::test]
    async fn test_consume_stream_yields_every_message() {
        let queue = Arc::new(InMemoryQueue::new());
        for i in 0..3 {
            queue.publish(&task(&format!("10.0.0.{}", i))).await.unwrap();
        }

        let queue_dyn: Arc<dyn TaskQueue> = queue.clone();
        let deliveries: Vec<_> = consume(queue_dyn).take(3).collect().await;

        let mut targets: Vec<String> = deliveries
            .into_iter()
            .map(|d| codec::decode(&d.unwrap().payload).unwrap().target)
            .collect();
        targets.sort();
        assert_eq!(targets, vec!["10.0.0.0", "10.0.0.1", "10.0.0.2"]);
        assert_eq!(queue.in_flight_count(), 3);
    }

    // ============================================================
    // REDIS QUEUE
    // ============================================================

    async fn redis_connection() -> Option<ConnectionManager> {
        let url = std::env::var("REDIS_URL").ok()?;
        let client = redis::Client::open(url).ok()?;
        ConnectionManager::new(client).await.ok()
    }

    fn queue_name() -> String {
        format!("test-queue-{}", ScanId::new())
    }

    /// Deletes the pending list and every processing list and claim of `queue_name`.
    async fn delete_queue(conn: &ConnectionManager, queue_name: &str, consumers: &[&str]) {
        let mut conn = conn.clone();
        let mut keys = vec![queue_name.to_string()];
        for consumer in consumers {
            keys.push(format!("{}:processing:{}", queue_name, consumer));
            keys.push(format!("{}:consumer:{}", queue_name, consumer));
        }
        let _: Result<i64, _> = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await;
    }

    async fn list_len(conn: &ConnectionManager, key: &str) -> usize {
        let mut conn = conn.clone();
        redis::cmd("LLEN").arg(key).query_async(&mut conn).await.unwrap()
    }

    #[tokio::test]
    async fn test_redis_publish_receive_ack() {
        let Some(conn) = redis_connection().await else {
            return;
        };
        let name = queue_name();
        let queue = RedisQueue::with_connection(conn.clone(), &name, "c1");
        let task = task("10.0.0.5");

        // ACT
        queue.publish(&task).await.unwrap();
        let pending_before = queue.pending_count().await.unwrap();
        let delivery = queue.receive().await.unwrap();
        let in_flight = list_len(&conn, &format!("{}:processing:c1", name)).await;
        queue.ack(&delivery).await.unwrap();
        let second_ack = queue.ack(&delivery).await;

        // ASSERT
        assert_eq!(pending_before, 1);
        assert_eq!(codec::decode(&delivery.payload).unwrap(), task);
        assert_eq!(in_flight, 1);
        assert_eq!(list_len(&conn, &format!("{}:processing:c1", name)).await, 0);
        assert!(matches!(second_ack, Err(QueueError::UnknownDelivery(_))));

        delete_queue(&conn, &name, &["c1"]).await;
    }

    #[tokio::test]
    async fn test_redis_nack_returns_payload_to_queue() {
        let Some(conn) = redis_connection().await else {
            return;
        };
        let name = queue_name();
        let queue = RedisQueue::with_connection(conn.clone(), &name, "c1");
        queue.publish(&task("10.0.0.5")).await.unwrap();

        let first = queue.receive().await.unwrap();
        let payload = first.payload.clone();
        queue.nack(first).await.unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 1);
        assert_eq!(list_len(&conn, &format!("{}:processing:c1", name)).await, 0);
        let second = tokio::time::timeout(Duration::from_secs(2), queue.receive())
            .await
            .expect("nacked payload should be received again")
            .unwrap();
        assert_eq!(second.payload, payload);

        delete_queue(&conn, &name, &["c1"]).await;
    }

    #[tokio::test]
    async fn test_redis_recover_requeues_unacked_payloads() {
        // ARRANGE: a consumer takes two tasks and "crashes"
        let Some(conn) = redis_connection().await else {
            return;
        };
        let name = queue_name();
        let crashed = RedisQueue::with_connection(conn.clone(), &name, "c1");
        crashed.publish(&task("10.0.0.1")).await.unwrap();
        crashed.publish(&task("10.0.0.2")).await.unwrap();
        crashed.receive().await.unwrap();
        crashed.receive().await.unwrap();
        assert_eq!(crashed.pending_count().await.unwrap(), 0);

        // ACT: the same consumer id restarts
        let restarted = RedisQueue::with_connection(conn.clone(), &name, "c1");
        let recovered = restarted.recover().await.unwrap();

        // ASSERT
        assert_eq!(recovered, 2);
        assert_eq!(restarted.pending_count().await.unwrap(), 2);
        assert_eq!(list_len(&conn, &format!("{}:processing:c1", name)).await, 0);

        delete_queue(&conn, &name, &["c1"]).await;
    }

    #[tokio::test]
    async fn test_redis_consumer_id_cannot_be_shared() {
        let Some(conn) = redis_connection().await else {
            return;
        };
        let name = queue_name();
        let first = RedisQueue::with_connection(conn.clone(), &name, "c1");
        let second = RedisQueue::with_connection(conn.clone(), &name, "c1");

        first.register().await.unwrap();
        let clash = second.register().await;
        let stolen_heartbeat = second.heartbeat().await;

        assert!(matches!(clash, Err(QueueError::ConsumerInUse(id)) if id == "c1"));
        assert!(matches!(stolen_heartbeat, Err(QueueError::ConsumerInUse(_))));
        first.heartbeat().await.unwrap();

        // A release by a non-holder leaves the claim; the holder's frees the id.
        second.deregister().await.unwrap();
        assert!(matches!(second.register().await, Err(QueueError::ConsumerInUse(_))));
        first.deregister().await.unwrap();
        second.register().await.unwrap();

        delete_queue(&conn, &name, &["c1"]).await;
    }

    #[tokio::test]
    async fn test_redis_reap_requeues_only_dead_consumers() {
        // ARRANGE: "dead" never holds a claim, "alive" does; both hold a task
        let Some(conn) = redis_connection().await else {
            return;
        };
        let name = queue_name();
        let dead = RedisQueue::with_connection(conn.clone(), &name, "dead");
        let alive = RedisQueue::with_connection(conn.clone(), &name, "alive");
        let reaper = RedisQueue::with_connection(conn.clone(), &name, "reaper");
        alive.register().await.unwrap();
        reaper.register().await.unwrap();

        dead.publish(&task("10.0.0.1")).await.unwrap();
        dead.receive().await.unwrap();
        alive.publish(&task("10.0.0.2")).await.unwrap();
        alive.receive().await.unwrap();

        // ACT
        let reaped = reaper.reap_stale().await.unwrap();

        // ASSERT
        assert_eq!(reaped, 1);
        assert_eq!(reaper.pending_count().await.unwrap(), 1);
        assert_eq!(list_len(&conn, &format!("{}:processing:dead", name)).await, 0);
        assert_eq!(list_len(&conn, &format!("{}:processing:alive", name)).await, 1);
        let requeued = reaper.receive().await.unwrap();
        assert_eq!(codec::decode(&requeued.payload).unwrap().target, "10.0.0.1");

        delete_queue(&conn, &name, &["dead", "alive", "reaper"]).await;
    }
}
