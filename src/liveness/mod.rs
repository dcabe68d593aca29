//! Instance liveness store
//!
//! One row per physical compute instance, keyed by `(name, region)`. The
//! deployer writes rows; invocation traffic only reads them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::storage::{RowKey, ScanFilter, StorageResult, TableRow, TableStorage};
use crate::vectors::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Active,
    Updating,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessRow {
    pub name: String,
    pub region: String,
    pub state: InstanceState,
}

impl LivenessRow {
    pub fn is_active(&self) -> bool {
        self.state == InstanceState::Active
    }

    fn key(&self) -> RowKey {
        RowKey::new(&self.name, &self.region)
    }
}

#[derive(Clone)]
pub struct LivenessStore {
    storage: Arc<dyn TableStorage>,
    table: String,
}

impl LivenessStore {
    pub fn new(storage: Arc<dyn TableStorage>, table: impl Into<String>) -> Self {
        Self {
            storage,
            table: table.into(),
        }
    }

    /// Liveness table for a deployment base name
    pub fn table_name(base: &str) -> String {
        format!("{}-instances", base)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn create(&self) -> Result<()> {
        self.storage.create_table(&self.table).await?;
        Ok(())
    }

    pub async fn destroy(&self) -> Result<()> {
        self.storage.delete_table(&self.table).await?;
        Ok(())
    }

    async fn write(&self, name: &str, region: &str, state: InstanceState) -> Result<()> {
        let row = LivenessRow {
            name: name.to_string(),
            region: region.to_string(),
            state,
        };
        self.storage
            .put(&self.table, TableRow::json(row.key(), now_millis(), &row)?)
            .await?;

        tracing::debug!(table = %self.table, name, region, state = ?state, "Liveness row written");
        Ok(())
    }

    /// Record an instance that is still being created
    pub async fn register(&self, name: &str, region: &str) -> Result<()> {
        self.write(name, region, InstanceState::Updating).await
    }

    pub async fn mark_active(&self, name: &str, region: &str) -> Result<()> {
        self.write(name, region, InstanceState::Active).await
    }

    pub async fn remove(&self, name: &str, region: &str) -> Result<()> {
        self.storage
            .delete(&self.table, &RowKey::new(name, region))
            .await?;
        Ok(())
    }

    /// Every row, in key order
    pub async fn rows(&self) -> Result<Vec<LivenessRow>> {
        let rows = self.storage.scan(&self.table, ScanFilter::All).await?;
        let decoded = rows
            .iter()
            .map(|row| row.decode::<LivenessRow>())
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(decoded)
    }

    pub async fn active(&self) -> Result<Vec<LivenessRow>> {
        let mut rows = self.rows().await?;
        rows.retain(LivenessRow::is_active);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::{MockStorageConfig, MockTableStorage};

    async fn store() -> LivenessStore {
        let store = LivenessStore::new(
            Arc::new(MockTableStorage::new(MockStorageConfig::fast())),
            LivenessStore::table_name("db-c"),
        );
        store.create().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_rows_flip_to_active() {
        let store = store().await;
        store.register("db-c-m0", "us-east-1").await.unwrap();
        assert!(store.active().await.unwrap().is_empty());

        store.mark_active("db-c-m0", "us-east-1").await.unwrap();
        let active = store.active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "db-c-m0");

        store.remove("db-c-m0", "us-east-1").await.unwrap();
        assert!(store.rows().await.unwrap().is_empty());
    }

    #[test]
    fn test_row_wire_format() {
        let row = LivenessRow {
            name: "a".into(),
            region: "eu-west-1".into(),
            state: InstanceState::Updating,
        };
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            serde_json::json!({"name": "a", "region": "eu-west-1", "state": "updating"})
        );
    }

    #[tokio::test]
    async fn test_destroy_removes_table() {
        let store = store().await;
        store.destroy().await.unwrap();
        assert!(store.rows().await.is_err());
    }
}
