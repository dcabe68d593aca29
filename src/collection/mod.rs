//! Collections: durable storage of labelled vectors
//!
//! ```text
//!                    ┌──────────────────────┐
//!   CollectionConfig │ open_collection()    │
//!   ───────────────▶ │  type discriminator  │
//!                    └──────────┬───────────┘
//!          ┌────────────────────┼─────────────────────┐
//!          ▼                    ▼                     ▼
//!  MemoryCollection     TableCollection       SnapshotCollection
//!  (process-local)      (key-value rows,      (immutable object,
//!                        tombstones)           static only)
//! ```
//!
//! Every write is a change record stamped with a timestamp. Removals write a
//! tombstone instead of deleting, so `changes_after` keeps reporting them to
//! readers that are catching up.

mod memory;
mod snapshot;
mod table;

pub use memory::MemoryCollection;
pub use snapshot::SnapshotCollection;
pub use table::TableCollection;

pub use crate::config::CollectionType;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::config::CollectionConfig;
use crate::error::{KnnError, Result};
use crate::storage::StorageBackend;
use crate::vectors::{check_vector, now_millis, ChangeRecord, Label, LabeledVector, Timestamp};

/// Lazy full scan of live vectors
pub type VectorStream = BoxStream<'static, Result<LabeledVector>>;

#[async_trait]
pub trait Collection: Send + Sync + 'static {
    /// Name of the backing resource (`{database}-{collection}`)
    fn name(&self) -> &str;

    fn kind(&self) -> CollectionType;

    fn dimensions(&self) -> usize;

    /// Number of live (non-tombstoned) vectors
    async fn size(&self) -> Result<usize>;

    /// Fresh pass over every live vector. Each call starts a new scan.
    async fn read_stream(&self) -> Result<VectorStream>;

    /// Live count together with a pass over the same vectors, for sizing and
    /// filling a new index. Backends that count by scanning do both at once.
    async fn sized_stream(&self) -> Result<(usize, VectorStream)> {
        let size = self.size().await?;
        Ok((size, self.read_stream().await?))
    }

    /// Upsert a batch with an explicit write time. The whole batch is
    /// validated before anything is written.
    async fn add_at(&self, vectors: Vec<LabeledVector>, timestamp: Timestamp) -> Result<()>;

    /// Upsert a batch stamped with the current time
    async fn add(&self, vectors: Vec<LabeledVector>) -> Result<()> {
        self.add_at(vectors, now_millis()).await
    }

    /// Tombstone each label with an explicit write time
    async fn remove_at(&self, labels: &[Label], timestamp: Timestamp) -> Result<()>;

    /// Tombstone each label at the current time
    async fn remove(&self, labels: &[Label]) -> Result<()> {
        self.remove_at(labels, now_millis()).await
    }

    /// Every record (upserts and tombstones) written strictly after
    /// `timestamp`, ordered by timestamp then label
    async fn changes_after(&self, timestamp: Timestamp) -> Result<Vec<ChangeRecord>>;

    /// Physically delete tombstoned records. Returns how many were removed.
    async fn cleanup_removed(&self) -> Result<usize> {
        Err(KnnError::unsupported(format!(
            "cleanup_removed is not available on {} collections",
            self.kind().as_str()
        )))
    }
}

/// Reject a batch if any vector has the wrong shape
pub(crate) fn validate_batch(dims: usize, vectors: &[LabeledVector]) -> Result<()> {
    vectors
        .iter()
        .try_for_each(|item| check_vector(dims, &item.vector))
}

/// Order change records by (timestamp, label)
pub(crate) fn sort_changes(changes: &mut [ChangeRecord]) {
    changes.sort_by(|a, b| (a.timestamp, a.label).cmp(&(b.timestamp, b.label)));
}

/// Name of the durable resource backing a collection
pub fn resource_name(database_name: &str, collection_name: &str) -> String {
    format!("{}-{}", database_name, collection_name)
}

/// Open a collection for a descriptor, dispatching once on its type.
///
/// Without a storage backend only dynamic in-memory collections are available.
pub fn open_collection(
    database_name: &str,
    config: &CollectionConfig,
    backend: Option<&StorageBackend>,
) -> Result<Arc<dyn Collection>> {
    config.validate()?;
    let name = resource_name(database_name, &config.collection_name);

    match (config.kind, backend) {
        (CollectionType::Dynamic, None) => {
            Ok(Arc::new(MemoryCollection::new(name, config.dimensions)))
        }
        (CollectionType::Dynamic, Some(backend)) => Ok(Arc::new(TableCollection::new(
            name,
            config.dimensions,
            backend.table.clone(),
        ))),
        (CollectionType::Static, Some(backend)) => Ok(Arc::new(SnapshotCollection::new(
            name,
            config.dimensions,
            config.size,
            backend.object.clone(),
        ))),
        (CollectionType::Static, None) => Err(KnnError::config(
            "static collections need object storage",
        )),
    }
}

/// Create the durable resources a collection needs before instances start.
/// Static collections must already have a published snapshot.
pub async fn provision_collection(
    database_name: &str,
    config: &CollectionConfig,
    backend: &StorageBackend,
) -> Result<()> {
    let name = resource_name(database_name, &config.collection_name);
    match config.kind {
        CollectionType::Dynamic => {
            backend.table.create_table(&name).await?;
            tracing::info!(table = %name, "Collection table ready");
        }
        CollectionType::Static => {
            let key = SnapshotCollection::snapshot_key(&name);
            if !backend.object.exists(&key).await? {
                return Err(KnnError::deploy(format!(
                    "snapshot {} has not been published",
                    key
                )));
            }
        }
    }
    Ok(())
}

/// Delete the durable resources of a dynamic collection. Snapshots are left
/// in place; they are owned by whoever published them.
pub async fn teardown_collection(
    database_name: &str,
    config: &CollectionConfig,
    backend: &StorageBackend,
) -> Result<()> {
    if config.kind == CollectionType::Dynamic {
        let name = resource_name(database_name, &config.collection_name);
        backend.table.delete_table(&name).await?;
        tracing::info!(table = %name, "Collection table deleted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::{create_temp_storage, MockStorageConfig};

    #[test]
    fn test_open_memory_collection() {
        let config = CollectionConfig::dynamic("c", 3);
        let collection = open_collection("db", &config, None).unwrap();
        assert_eq!(collection.name(), "db-c");
        assert_eq!(collection.kind(), CollectionType::Dynamic);
        assert_eq!(collection.dimensions(), 3);
    }

    #[test]
    fn test_static_needs_storage() {
        let config = CollectionConfig::fixed("c", 3, 10);
        assert!(open_collection("db", &config, None).is_err());
    }

    #[tokio::test]
    async fn test_provision_and_teardown_dynamic() {
        let backend = create_temp_storage(MockStorageConfig::fast()).unwrap();
        let config = CollectionConfig::dynamic("c", 2);

        provision_collection("db", &config, &backend).await.unwrap();
        assert!(backend.table.table_exists("db-c").await.unwrap());

        teardown_collection("db", &config, &backend).await.unwrap();
        assert!(!backend.table.table_exists("db-c").await.unwrap());
    }

    #[tokio::test]
    async fn test_provision_static_requires_snapshot() {
        let backend = create_temp_storage(MockStorageConfig::fast()).unwrap();
        let config = CollectionConfig::fixed("frozen", 2, 1);

        let err = provision_collection("db", &config, &backend).await.unwrap_err();
        assert!(matches!(err, KnnError::Deploy(_)));

        SnapshotCollection::publish(
            "db-frozen",
            2,
            &[LabeledVector::new(1, vec![0.0, 1.0])],
            backend.object.clone(),
        )
        .await
        .unwrap();
        provision_collection("db", &config, &backend).await.unwrap();
    }
}
