// Connection registry: register / unregister / update / list against the
// store. Stateless between calls; every operation reads or writes through
// the injected [`ConnectionStore`], so concurrent handler invocations see
// whatever consistency the store itself provides.

use tally_common::types::ConnectionRecord;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::store::{ConnectionStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Update addressed to an id absent from the store. Signals a logic
    /// error upstream: update before connect, or a race with disconnect.
    #[error("connection `{connection_id}` is not registered")]
    NotFound { connection_id: String },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RegistryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { connection_id } => Self::NotFound { connection_id },
            other => Self::Store(other),
        }
    }
}

/// Stateless facade over the connection store.
#[derive(Clone)]
pub struct ConnectionRegistry {
    store: ConnectionStore,
}

impl ConnectionRegistry {
    pub fn new(store: ConnectionStore) -> Self {
        Self { store }
    }

    /// Insert a fresh record with no value. Idempotent: a duplicate
    /// connect event for the same id overwrites the existing record.
    pub async fn register(&self, connection_id: &str) -> Result<(), RegistryError> {
        self.store.put(ConnectionRecord::new(connection_id)).await?;
        Ok(())
    }

    /// Delete the record. Absent ids are a no-op so duplicate or
    /// disordered disconnect events cannot fail.
    pub async fn unregister(&self, connection_id: &str) -> Result<(), RegistryError> {
        self.store.delete(connection_id).await?;
        Ok(())
    }

    /// Replace one connection's value. [`RegistryError::NotFound`] when
    /// the id is not registered.
    pub async fn update_value(
        &self,
        connection_id: &str,
        value: serde_json::Value,
    ) -> Result<ConnectionRecord, RegistryError> {
        Ok(self.store.update_value(connection_id, value).await?)
    }

    /// Full current snapshot, unordered.
    pub async fn list_all(&self) -> Result<Vec<ConnectionRecord>, RegistryError> {
        Ok(self.store.scan_all().await?)
    }

    /// Apply `value` to every registered connection concurrently and
    /// return the records that were updated successfully.
    ///
    /// One task per record, all joined: a record removed between the scan
    /// and its update is dropped from the result, never aborting the
    /// sibling updates. Only the initial scan can fail the call.
    pub async fn update_all(
        &self,
        value: serde_json::Value,
    ) -> Result<Vec<ConnectionRecord>, RegistryError> {
        let snapshot = self.list_all().await?;
        Ok(self.update_records(snapshot, value).await)
    }

    /// Concurrently update every record in an already-taken snapshot.
    /// The snapshot may be stale; records that vanished since are skipped.
    async fn update_records(
        &self,
        snapshot: Vec<ConnectionRecord>,
        value: serde_json::Value,
    ) -> Vec<ConnectionRecord> {
        let mut tasks = JoinSet::new();
        for record in snapshot {
            let registry = self.clone();
            let value = value.clone();
            tasks.spawn(async move {
                let connection_id = record.connection_id;
                let result = registry.update_value(&connection_id, value).await;
                (connection_id, result)
            });
        }

        let mut updated = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(record))) => updated.push(record),
                Ok((connection_id, Err(RegistryError::NotFound { .. }))) => {
                    debug!(%connection_id, "connection vanished mid-batch; skipping");
                }
                Ok((connection_id, Err(error))) => {
                    warn!(%connection_id, %error, "batch update failed for connection");
                }
                Err(join_error) => {
                    warn!(%join_error, "batch update task panicked");
                }
            }
        }

        updated
    }
}
