//! PostgreSQL record store.
//!
//! Connection pooling uses deadpool-postgres. Each operation checks out one
//! connection, runs one statement (two for a first-time acquire) and returns
//! the connection, so no connection is held across the acquire poll loop.

use crate::RecordStore;
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use syncbridge_core::{
    EntityId, EpochMillis, OwnerId, Record, StateBlob, StorageError, SyncError, SyncResult,
};
use tokio_postgres::NoTls;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection checkout timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "syncbridge".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 10,
            timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("SYNCBRIDGE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("SYNCBRIDGE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("SYNCBRIDGE_DB_NAME")
                .unwrap_or_else(|_| "syncbridge".to_string()),
            user: std::env::var("SYNCBRIDGE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("SYNCBRIDGE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("SYNCBRIDGE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            timeout: Duration::from_secs(
                std::env::var("SYNCBRIDGE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> SyncResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        pool_cfg.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::unavailable(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Columns added after the first schema version, checked one by one.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("is_locked", "BOOLEAN NOT NULL DEFAULT FALSE"),
    ("locking_owner", "VARCHAR(255)"),
    ("lease_timestamp", "BIGINT"),
    ("last_updated", "TIMESTAMPTZ NOT NULL DEFAULT now()"),
];

// ============================================================================
// STORE
// ============================================================================

/// Record store over a PostgreSQL table named `<prefix>player_data`.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: Pool,
    table: String,
}

impl PgRecordStore {
    /// `table` must already be validated (see `SyncConfig::validate`).
    pub fn new(pool: Pool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub fn from_config(config: &DbConfig, table: impl Into<String>) -> SyncResult<Self> {
        Ok(Self::new(config.create_pool()?, table))
    }

    async fn get_conn(&self) -> SyncResult<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| SyncError::from(StorageError::unavailable(e)))
    }

    async fn execute(
        &self,
        operation: &str,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> SyncResult<u64> {
        let conn = self.get_conn().await?;
        conn.execute(sql, params)
            .await
            .map_err(|e| StorageError::query(operation, e).into())
    }

    async fn column_exists(&self, conn: &Object, column: &str) -> SyncResult<bool> {
        let row = conn
            .query_opt(
                "SELECT 1 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name::text = $1 AND column_name::text = $2",
                &[&self.table.to_lowercase(), &column],
            )
            .await
            .map_err(schema_err)?;
        Ok(row.is_some())
    }

    async fn data_is_nullable(&self, conn: &Object) -> SyncResult<bool> {
        let row = conn
            .query_opt(
                "SELECT is_nullable::text FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name::text = $1 \
                 AND column_name::text = 'data'",
                &[&self.table.to_lowercase()],
            )
            .await
            .map_err(schema_err)?;
        Ok(row
            .map(|r| r.get::<_, String>(0).eq_ignore_ascii_case("YES"))
            .unwrap_or(true))
    }
}

fn schema_err(e: tokio_postgres::Error) -> SyncError {
    StorageError::SchemaSetup {
        reason: e.to_string(),
    }
    .into()
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn init_schema(&self) -> SyncResult<()> {
        let conn = self.get_conn().await?;
        let t = &self.table;

        conn.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {t} (\
                id VARCHAR(36) PRIMARY KEY, \
                data TEXT, \
                is_locked BOOLEAN NOT NULL DEFAULT FALSE, \
                locking_owner VARCHAR(255), \
                lease_timestamp BIGINT, \
                last_updated TIMESTAMPTZ NOT NULL DEFAULT now()\
            )"
        ))
        .await
        .map_err(schema_err)?;

        for (column, definition) in ADDITIVE_COLUMNS {
            if !self.column_exists(&conn, column).await? {
                conn.batch_execute(&format!("ALTER TABLE {t} ADD COLUMN {column} {definition}"))
                    .await
                    .map_err(schema_err)?;
                tracing::info!(table = %t, column, "Added missing column");
            }
        }

        if !self.data_is_nullable(&conn).await? {
            conn.batch_execute(&format!("ALTER TABLE {t} ALTER COLUMN data DROP NOT NULL"))
                .await
                .map_err(schema_err)?;
            tracing::info!(table = %t, "Made data column nullable");
        }

        tracing::info!(table = %t, "Record table ready");
        Ok(())
    }

    async fn acquire(
        &self,
        id: EntityId,
        owner: &OwnerId,
        now: EpochMillis,
        stale_before: EpochMillis,
    ) -> SyncResult<bool> {
        let key = id.as_db_string();
        let updated = self
            .execute(
                "acquire",
                &format!(
                    "UPDATE {} SET is_locked = TRUE, locking_owner = $2, lease_timestamp = $3, \
                     last_updated = now() \
                     WHERE id = $1 AND (is_locked = FALSE OR is_locked IS NULL \
                     OR lease_timestamp IS NULL OR lease_timestamp < $4)",
                    self.table
                ),
                &[&key, &owner.as_str(), &now, &stale_before],
            )
            .await?;
        if updated > 0 {
            return Ok(true);
        }

        let inserted = self
            .execute(
                "acquire_insert",
                &format!(
                    "INSERT INTO {} (id, data, is_locked, locking_owner, lease_timestamp, last_updated) \
                     VALUES ($1, NULL, TRUE, $2, $3, now()) ON CONFLICT (id) DO NOTHING",
                    self.table
                ),
                &[&key, &owner.as_str(), &now],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn is_owner(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT 1 FROM {} WHERE id = $1 AND is_locked = TRUE AND locking_owner = $2",
                    self.table
                ),
                &[&id.as_db_string(), &owner.as_str()],
            )
            .await
            .map_err(|e| StorageError::query("is_owner", e))?;
        Ok(row.is_some())
    }

    async fn renew(&self, id: EntityId, owner: &OwnerId, now: EpochMillis) -> SyncResult<bool> {
        let updated = self
            .execute(
                "renew",
                &format!(
                    "UPDATE {} SET lease_timestamp = $3, last_updated = now() \
                     WHERE id = $1 AND is_locked = TRUE AND locking_owner = $2",
                    self.table
                ),
                &[&id.as_db_string(), &owner.as_str(), &now],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn release(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool> {
        let updated = self
            .execute(
                "release",
                &format!(
                    "UPDATE {} SET is_locked = FALSE, locking_owner = NULL, lease_timestamp = NULL, \
                     last_updated = now() WHERE id = $1 AND locking_owner = $2",
                    self.table
                ),
                &[&id.as_db_string(), &owner.as_str()],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn force_release(&self, id: EntityId) -> SyncResult<bool> {
        let updated = self
            .execute(
                "force_release",
                &format!(
                    "UPDATE {} SET is_locked = FALSE, locking_owner = NULL, lease_timestamp = NULL, \
                     last_updated = now() WHERE id = $1",
                    self.table
                ),
                &[&id.as_db_string()],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn save_and_release(
        &self,
        id: EntityId,
        owner: &OwnerId,
        blob: &str,
    ) -> SyncResult<bool> {
        let updated = self
            .execute(
                "save_and_release",
                &format!(
                    "UPDATE {} SET data = $3, is_locked = FALSE, locking_owner = NULL, \
                     lease_timestamp = NULL, last_updated = now() \
                     WHERE id = $1 AND is_locked = TRUE AND locking_owner = $2",
                    self.table
                ),
                &[&id.as_db_string(), &owner.as_str(), &blob],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn sweep_orphans(&self, owner: &OwnerId) -> SyncResult<u64> {
        self.execute(
            "sweep_orphans",
            &format!(
                "UPDATE {} SET is_locked = FALSE, locking_owner = NULL, lease_timestamp = NULL, \
                 last_updated = now() WHERE locking_owner = $1",
                self.table
            ),
            &[&owner.as_str()],
        )
        .await
    }

    async fn load(&self, id: EntityId) -> SyncResult<Option<StateBlob>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT data FROM {} WHERE id = $1", self.table),
                &[&id.as_db_string()],
            )
            .await
            .map_err(|e| StorageError::query("load", e))?;
        Ok(row.and_then(|r| r.get::<_, Option<String>>(0)))
    }

    async fn record(&self, id: EntityId) -> SyncResult<Option<Record>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT data, is_locked, locking_owner, lease_timestamp, last_updated \
                     FROM {} WHERE id = $1",
                    self.table
                ),
                &[&id.as_db_string()],
            )
            .await
            .map_err(|e| StorageError::query("record", e))?;

        Ok(row.map(|r| Record {
            id,
            data: r.get(0),
            is_locked: r.get::<_, Option<bool>>(1).unwrap_or(false),
            locking_owner: r.get::<_, Option<String>>(2).map(OwnerId::from),
            lease_timestamp: r.get(3),
            last_updated: r.get(4),
        }))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_default() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "syncbridge");
        assert_eq!(config.max_size, 10);
    }

    #[test]
    fn test_additive_columns_cover_lock_fields() {
        let names: Vec<_> = ADDITIVE_COLUMNS.iter().map(|(c, _)| *c).collect();
        assert_eq!(
            names,
            vec!["is_locked", "locking_owner", "lease_timestamp", "last_updated"]
        );
    }

    async fn db_test_store() -> Option<PgRecordStore> {
        if std::env::var("DB_TESTS").ok().as_deref() != Some("1") {
            return None;
        }

        let table = format!("sbtest_{}_player_data", std::process::id());
        let store = PgRecordStore::from_config(&DbConfig::from_env(), table).ok()?;
        store.init_schema().await.ok()?;
        Some(store)
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let Some(store) = db_test_store().await else {
            return;
        };
        store.init_schema().await.expect("second init");
        store.init_schema().await.expect("third init");
    }

    #[tokio::test]
    async fn test_pg_lock_lifecycle() {
        let Some(store) = db_test_store().await else {
            return;
        };
        let a = OwnerId::from("pg-a");
        let b = OwnerId::from("pg-b");
        let id = EntityId::now_v7();

        assert!(store.acquire(id, &a, 1_000, 0).await.unwrap());
        assert!(!store.acquire(id, &b, 2_000, 1_000).await.unwrap());
        assert!(store.is_owner(id, &a).await.unwrap());
        assert!(store.renew(id, &a, 3_000).await.unwrap());
        assert!(!store.renew(id, &b, 3_000).await.unwrap());

        assert!(store.save_and_release(id, &a, r#"{"health":7.0}"#).await.unwrap());
        let rec = store.record(id).await.unwrap().unwrap();
        assert!(!rec.is_locked);
        assert!(rec.lock_fields_consistent());
        assert_eq!(store.load(id).await.unwrap().as_deref(), Some(r#"{"health":7.0}"#));

        assert!(store.acquire(id, &b, 4_000, 0).await.unwrap());
        assert!(!store.release(id, &a).await.unwrap());
        assert!(store.is_owner(id, &b).await.unwrap());
        assert!(store.force_release(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_pg_stale_steal_and_sweep() {
        let Some(store) = db_test_store().await else {
            return;
        };
        let a = OwnerId::from("pg-sweep-a");
        let b = OwnerId::from("pg-sweep-b");
        let id = EntityId::now_v7();

        store.acquire(id, &a, 1_000, 0).await.unwrap();
        assert!(store.acquire(id, &b, 100_000, 1_001).await.unwrap());
        assert!(!store.save_and_release(id, &a, "{}").await.unwrap());

        let swept = store.sweep_orphans(&b).await.unwrap();
        assert!(swept >= 1);
        assert!(!store.is_owner(id, &b).await.unwrap());
    }
}
