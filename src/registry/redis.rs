use super::{ensure_pending, ensure_terminal, log_overwrite, RegistryError, ScanRegistry};
use crate::scan::types::{ScanId, ScanRecord};

use async_trait::async_trait;
use redis::aio::ConnectionManager;

pub const DEFAULT_KEY_PREFIX: &str = "scan";

/// Registry shared across processes through Redis.
///
/// Each record is a JSON string under `<prefix>:<scan id>`. `create` uses
/// `SET NX` so a scan id can be registered only once.
#[derive(Clone)]
pub struct RedisRegistry {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisRegistry {
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, RegistryError> {
        tracing::info!("Connecting scan registry to Redis at {}", redis_url);

        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self::with_connection(conn, prefix))
    }

    /// Builds the registry on top of an existing connection (shared with the queue).
    pub fn with_connection(conn: ConnectionManager, prefix: &str) -> Self {
        Self {
            conn,
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, scan_id: &ScanId) -> String {
        format!("{}:{}", self.prefix, scan_id)
    }
}

#[async_trait]
impl ScanRegistry for RedisRegistry {
    async fn create(&self, record: ScanRecord) -> Result<(), RegistryError> {
        ensure_pending(&record)?;

        let json = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(&record.scan_id))
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => {
                tracing::debug!("Registered pending scan {} in Redis", record.scan_id);
                Ok(())
            }
            None => Err(RegistryError::AlreadyExists(record.scan_id)),
        }
    }

    async fn finalize(&self, mut record: ScanRecord) -> Result<(), RegistryError> {
        ensure_terminal(&record)?;

        if let Some(existing) = self.get(&record.scan_id).await? {
            log_overwrite(&existing, &record);
            record.created_at = existing.created_at;
        }

        let json = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("SET")
            .arg(self.key(&record.scan_id))
            .arg(json)
            .query_async(&mut conn)
            .await?;

        tracing::debug!("Stored {} record for scan {}", record.status(), record.scan_id);
        Ok(())
    }

    async fn get(&self, scan_id: &ScanId) -> Result<Option<ScanRecord>, RegistryError> {
        let mut conn = self.conn.clone();

        let data: Option<String> = redis::cmd("GET")
            .arg(self.key(scan_id))
            .query_async(&mut conn)
            .await?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
