// Durable mapping from connection id to connection record.
//
// The store is the only owner of persisted session state. Everything
// above it (registry, fanout, handlers) reads and writes through this
// handle, so tests can substitute the in-memory backend for Postgres.

use std::{collections::HashMap, env, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tally_common::types::ConnectionRecord;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::ServerConfig;

const DEFAULT_MIN_CONNECTIONS: u32 = 2;
const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The addressed connection id has no record. Only partial updates
    /// fail this way; put and delete are idempotent.
    #[error("connection `{connection_id}` not found")]
    NotFound { connection_id: String },

    /// Transient I/O failure from the underlying database. No automatic
    /// retry here; surfaced to the caller as a 500-equivalent.
    #[error("connection store backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Handle to the connection store. Clones share the same backend.
#[derive(Clone)]
pub enum ConnectionStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<String, ConnectionRecord>>>),
}

impl ConnectionStore {
    /// In-memory backend, used by tests and when no database is configured.
    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Select a backend from configuration: Postgres when a database URL
    /// is present, otherwise in-memory (records do not survive restarts).
    pub async fn from_config(config: &ServerConfig) -> Result<Self> {
        match &config.database_url {
            Some(database_url) => {
                let pool = create_pg_pool(database_url, PoolConfig::from_env())
                    .await
                    .context("failed to initialize connection store PostgreSQL pool")?;
                check_pool_health(&pool)
                    .await
                    .context("connection store PostgreSQL health check failed")?;
                ensure_schema(&pool)
                    .await
                    .context("failed to create connection store schema")?;
                Ok(Self::Postgres(pool))
            }
            None => {
                warn!("TALLY_SERVER_DATABASE_URL not set; using in-memory connection store");
                Ok(Self::in_memory())
            }
        }
    }

    /// Insert or fully replace a record by connection id. Idempotent.
    pub async fn put(&self, record: ConnectionRecord) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO connections (connection_id, value)
                    VALUES ($1, $2)
                    ON CONFLICT (connection_id) DO UPDATE SET value = EXCLUDED.value
                    "#,
                )
                .bind(&record.connection_id)
                .bind(&record.value)
                .execute(pool)
                .await?;
                Ok(())
            }
            Self::Memory(map) => {
                map.write().await.insert(record.connection_id.clone(), record);
                Ok(())
            }
        }
    }

    /// Remove a record if present. Absent ids are a no-op, not an error.
    pub async fn delete(&self, connection_id: &str) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query("DELETE FROM connections WHERE connection_id = $1")
                    .bind(connection_id)
                    .execute(pool)
                    .await?;
                Ok(())
            }
            Self::Memory(map) => {
                map.write().await.remove(connection_id);
                Ok(())
            }
        }
    }

    /// Replace the `value` field of one record, leaving the rest of the
    /// row untouched. Fails with [`StoreError::NotFound`] when the id has
    /// no record.
    pub async fn update_value(
        &self,
        connection_id: &str,
        value: serde_json::Value,
    ) -> Result<ConnectionRecord, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query(
                    r#"
                    UPDATE connections
                    SET value = $2
                    WHERE connection_id = $1
                    RETURNING connection_id, value
                    "#,
                )
                .bind(connection_id)
                .bind(&value)
                .fetch_optional(pool)
                .await?;

                match row {
                    Some(row) => Ok(record_from_row(&row)),
                    None => Err(StoreError::NotFound { connection_id: connection_id.to_owned() }),
                }
            }
            Self::Memory(map) => {
                let mut guard = map.write().await;
                match guard.get_mut(connection_id) {
                    Some(record) => {
                        record.value = Some(value);
                        Ok(record.clone())
                    }
                    None => Err(StoreError::NotFound { connection_id: connection_id.to_owned() }),
                }
            }
        }
    }

    /// All currently stored records. No ordering guarantee.
    pub async fn scan_all(&self) -> Result<Vec<ConnectionRecord>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query("SELECT connection_id, value FROM connections")
                    .fetch_all(pool)
                    .await?;
                Ok(rows.iter().map(record_from_row).collect())
            }
            Self::Memory(map) => Ok(map.read().await.values().cloned().collect()),
        }
    }
}

fn record_from_row(row: &PgRow) -> ConnectionRecord {
    ConnectionRecord {
        connection_id: row.get("connection_id"),
        value: row.get("value"),
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        let min_connections = env::var("TALLY_SERVER_DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MIN_CONNECTIONS);

        let max_connections = env::var("TALLY_SERVER_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let acquire_timeout_secs = env::var("TALLY_SERVER_DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);

        Self {
            min_connections,
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
        }
    }
}

pub async fn create_pg_pool(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .context("failed to connect to connection store PostgreSQL")
}

pub async fn check_pool_health(pool: &PgPool) -> Result<()> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .context("connection store PostgreSQL health check failed")?;

    Ok(())
}

async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS connections (
            connection_id TEXT PRIMARY KEY,
            value JSONB
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create connections table")?;

    Ok(())
}
