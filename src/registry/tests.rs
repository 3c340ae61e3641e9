//! Registry Module Tests
//!
//! Exercises the write rules of the in-memory registry. The Redis tests run only
//! when `REDIS_URL` points at a live broker; each uses its own key prefix and
//! deletes its keys afterwards.

#[cfg(test)]
mod tests {
    use crate::registry::{is_downgrade, InMemoryRegistry, RedisRegistry, RegistryError, ScanRegistry};
    use crate::scan::types::{
        CompositeResult, ScanId, ScanRecord, ScanState, ScanStatus, ScanTask, ScanType,
        SourceResult,
    };

    use redis::aio::ConnectionManager;

    /// Connection to the broker named by `REDIS_URL`, if any.
    async fn redis_connection() -> Option<ConnectionManager> {
        let url = std::env::var("REDIS_URL").ok()?;
        let client = redis::Client::open(url).unwrap();
        Some(ConnectionManager::new(client).await.unwrap())
    }

    async fn delete_keys(conn: &mut ConnectionManager, keys: &[String]) {
        let _: i64 = redis::cmd("DEL").arg(keys).query_async(conn).await.unwrap();
    }

    fn sample_task() -> ScanTask {
        ScanTask::new(ScanId::new(), "10.0.0.5", ScanType::Basic)
    }

    fn done_state() -> ScanState {
        ScanState::Done(CompositeResult {
            probe: SourceResult::Ok(serde_json::json!({"raw": "22/tcp open ssh"})),
            host_intel: SourceResult::error("No API key set"),
            vuln_db: SourceResult::error("No API key set"),
        })
    }

    // ============================================================
    // CREATE
    // ============================================================

    #[tokio::test]
    async fn test_create_then_get_returns_pending() {
        let registry = InMemoryRegistry::new();
        let task = sample_task();

        registry.create(ScanRecord::pending(&task)).await.unwrap();

        let record = registry.get(&task.scan_id).await.unwrap().unwrap();
        assert_eq!(record.status(), ScanStatus::Pending);
        assert_eq!(record.target, "10.0.0.5");
        assert_eq!(record.state.result_json(), None);
    }

    #[tokio::test]
    async fn test_create_twice_is_rejected() {
        let registry = InMemoryRegistry::new();
        let task = sample_task();

        registry.create(ScanRecord::pending(&task)).await.unwrap();
        let second = registry.create(ScanRecord::pending(&task)).await;

        assert!(matches!(second, Err(RegistryError::AlreadyExists(_))));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_terminal_record() {
        let registry = InMemoryRegistry::new();
        let record = ScanRecord::with_state(&sample_task(), done_state());

        let result = registry.create(record).await;

        assert!(matches!(
            result,
            Err(RegistryError::InvalidTransition {
                status: ScanStatus::Done,
                ..
            })
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_none() {
        let registry = InMemoryRegistry::new();

        let record = registry.get(&ScanId::new()).await.unwrap();

        assert!(record.is_none());
    }

    // ============================================================
    // FINALIZE
    // ============================================================

    #[tokio::test]
    async fn test_finalize_moves_pending_to_done_and_keeps_created_at() {
        let registry = InMemoryRegistry::new();
        let task = sample_task();
        let mut pending = ScanRecord::pending(&task);
        pending.created_at = 42;
        registry.create(pending).await.unwrap();

        registry
            .finalize(ScanRecord::with_state(&task, done_state()))
            .await
            .unwrap();

        let record = registry.get(&task.scan_id).await.unwrap().unwrap();
        assert_eq!(record.status(), ScanStatus::Done);
        assert_eq!(record.created_at, 42);
        assert!(record.updated_at >= record.created_at);
    }

    #[tokio::test]
    async fn test_finalize_refuses_to_go_back_to_pending() {
        let registry = InMemoryRegistry::new();
        let task = sample_task();
        registry
            .finalize(ScanRecord::with_state(&task, done_state()))
            .await
            .unwrap();

        let result = registry.finalize(ScanRecord::pending(&task)).await;

        assert!(result.is_err());
        let record = registry.get(&task.scan_id).await.unwrap().unwrap();
        assert_eq!(record.status(), ScanStatus::Done);
    }

    #[tokio::test]
    async fn test_finalize_twice_keeps_terminal_state() {
        let registry = InMemoryRegistry::new();
        let task = sample_task();
        registry.create(ScanRecord::pending(&task)).await.unwrap();

        registry
            .finalize(ScanRecord::with_state(&task, done_state()))
            .await
            .unwrap();
        registry
            .finalize(ScanRecord::with_state(&task, done_state()))
            .await
            .unwrap();

        let record = registry.get(&task.scan_id).await.unwrap().unwrap();
        assert_eq!(record.state, done_state());
        assert_eq!(registry.status_counts(), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_finalize_unknown_id_creates_record() {
        let registry = InMemoryRegistry::new();
        let task = sample_task();

        registry
            .finalize(ScanRecord::with_state(
                &task,
                ScanState::Error("boom".to_string()),
            ))
            .await
            .unwrap();

        let record = registry.get(&task.scan_id).await.unwrap().unwrap();
        assert_eq!(record.status(), ScanStatus::Error);
        assert_eq!(
            record.state.result_json(),
            Some(serde_json::json!({"error": "boom"}))
        );
    }

    #[tokio::test]
    async fn test_done_overwritten_by_error_is_a_downgrade() {
        // ARRANGE
        let registry = InMemoryRegistry::new();
        let task = sample_task();
        registry.create(ScanRecord::pending(&task)).await.unwrap();
        let done = ScanRecord::with_state(&task, done_state());
        let failed = ScanRecord::with_state(&task, ScanState::Error("scan execution failed".to_string()));
        registry.finalize(done.clone()).await.unwrap();

        // ACT: a later run of the same scan fails
        registry.finalize(failed.clone()).await.unwrap();

        // ASSERT: last write wins, and the flip is recognised
        let record = registry.get(&task.scan_id).await.unwrap().unwrap();
        assert_eq!(record.status(), ScanStatus::Error);
        assert!(is_downgrade(&done, &failed));
        assert!(!is_downgrade(&failed, &done));
        assert!(!is_downgrade(&done, &done));
        assert!(!is_downgrade(&ScanRecord::pending(&task), &failed));
    }

    // ============================================================
    // REDIS BACKEND
    // ============================================================

    #[tokio::test]
    async fn test_redis_create_twice_is_rejected() {
        let Some(mut conn) = redis_connection().await else {
            return;
        };
        let prefix = format!("test-scan-{}", ScanId::new());
        let registry = RedisRegistry::with_connection(conn.clone(), &prefix);
        let task = sample_task();

        registry.create(ScanRecord::pending(&task)).await.unwrap();
        let second = registry.create(ScanRecord::pending(&task)).await;

        assert!(matches!(second, Err(RegistryError::AlreadyExists(_))));
        let record = registry.get(&task.scan_id).await.unwrap().unwrap();
        assert_eq!(record.status(), ScanStatus::Pending);

        delete_keys(&mut conn, &[format!("{}:{}", prefix, task.scan_id)]).await;
    }

    #[tokio::test]
    async fn test_redis_finalize_keeps_created_at() {
        // ARRANGE
        let Some(mut conn) = redis_connection().await else {
            return;
        };
        let prefix = format!("test-scan-{}", ScanId::new());
        let registry = RedisRegistry::with_connection(conn.clone(), &prefix);
        let task = sample_task();
        let mut pending = ScanRecord::pending(&task);
        pending.created_at = 42;
        registry.create(pending).await.unwrap();

        // ACT
        registry
            .finalize(ScanRecord::with_state(&task, done_state()))
            .await
            .unwrap();

        // ASSERT
        let record = registry.get(&task.scan_id).await.unwrap().unwrap();
        assert_eq!(record.state, done_state());
        assert_eq!(record.created_at, 42);
        assert!(registry.get(&ScanId::new()).await.unwrap().is_none());
        assert!(registry.finalize(ScanRecord::pending(&task)).await.is_err());

        delete_keys(&mut conn, &[format!("{}:{}", prefix, task.scan_id)]).await;
    }

    // ============================================================
    // SERIALIZATION
    // ============================================================

    #[test]
    fn test_record_json_shape() {
        let task = sample_task();
        let record = ScanRecord::with_state(&task, done_state());

        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["scanId"], task.scan_id.as_str());
        assert_eq!(json["scanType"], "basic");
        assert_eq!(json["state"]["status"], "done");
        assert_eq!(json["state"]["result"]["probe"]["ok"]["raw"], "22/tcp open ssh");
        assert_eq!(json["state"]["result"]["hostIntel"]["error"], "No API key set");

        let restored: ScanRecord = serde_json::from_value(json).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_pending_state_json_has_no_result() {
        let json = serde_json::to_value(ScanState::Pending).unwrap();

        assert_eq!(json, serde_json::json!({"status": "pending"}));
    }
}
