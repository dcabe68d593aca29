//! Immutable snapshot collection (static collections)
//!
//! The whole collection is one object written once by `publish`. Instances
//! never write to it; every cold start streams the snapshot back.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

use super::{validate_batch, Collection, CollectionType, VectorStream};
use crate::error::{KnnError, Result};
use crate::storage::ObjectStorage;
use crate::vectors::format::{encode_snapshot, Snapshot};
use crate::vectors::{ChangeRecord, Label, LabeledVector, Timestamp};

pub struct SnapshotCollection {
    name: String,
    dims: usize,
    /// Size declared at creation; read from the snapshot header when absent
    size: Option<usize>,
    storage: Arc<dyn ObjectStorage>,
}

impl SnapshotCollection {
    pub fn new(
        name: impl Into<String>,
        dims: usize,
        size: Option<usize>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            name: name.into(),
            dims,
            size,
            storage,
        }
    }

    pub fn snapshot_key(name: &str) -> String {
        format!("{}/snapshot.knns", name)
    }

    /// Write the snapshot object for a static collection
    pub async fn publish(
        name: &str,
        dims: usize,
        vectors: &[LabeledVector],
        storage: Arc<dyn ObjectStorage>,
    ) -> Result<()> {
        validate_batch(dims, vectors)?;

        let key = Self::snapshot_key(name);
        storage.put(&key, encode_snapshot(dims, vectors)).await?;

        tracing::info!(key = %key, count = vectors.len(), dims, "Snapshot published");
        Ok(())
    }

    async fn load(&self) -> Result<Snapshot> {
        let data = self.storage.get(&Self::snapshot_key(&self.name)).await?;
        let snapshot = Snapshot::decode(data)?;

        if snapshot.dims() != self.dims {
            return Err(KnnError::config(format!(
                "snapshot {} has {} dimensions, collection expects {}",
                self.name,
                snapshot.dims(),
                self.dims
            )));
        }
        Ok(snapshot)
    }

    fn read_only(&self) -> KnnError {
        KnnError::unsupported(format!("collection {} is static", self.name))
    }
}

#[async_trait]
impl Collection for SnapshotCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CollectionType {
        CollectionType::Static
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn size(&self) -> Result<usize> {
        match self.size {
            Some(size) => Ok(size),
            None => Ok(self.load().await?.len()),
        }
    }

    async fn read_stream(&self) -> Result<VectorStream> {
        let snapshot = self.load().await?;
        Ok(futures::stream::iter(snapshot.records().map(Ok)).boxed())
    }

    async fn add_at(&self, _vectors: Vec<LabeledVector>, _timestamp: Timestamp) -> Result<()> {
        Err(self.read_only())
    }

    async fn remove_at(&self, _labels: &[Label], _timestamp: Timestamp) -> Result<()> {
        Err(self.read_only())
    }

    /// A snapshot never changes after publication
    async fn changes_after(&self, _timestamp: Timestamp) -> Result<Vec<ChangeRecord>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::{MockObjectStorage, MockStorageConfig};
    use futures::TryStreamExt;

    fn storage() -> Arc<dyn ObjectStorage> {
        Arc::new(MockObjectStorage::temp(MockStorageConfig::fast()).unwrap())
    }

    #[tokio::test]
    async fn test_publish_and_stream() {
        let storage = storage();
        let vectors = vec![
            LabeledVector::new(1, vec![1.0, 2.0]),
            LabeledVector::new(2, vec![3.0, 4.0]),
        ];
        SnapshotCollection::publish("db-s", 2, &vectors, storage.clone())
            .await
            .unwrap();

        let collection = SnapshotCollection::new("db-s", 2, None, storage);
        assert_eq!(collection.size().await.unwrap(), 2);

        // Restartable: two independent passes see the same data
        for _ in 0..2 {
            let read: Vec<LabeledVector> = collection
                .read_stream()
                .await
                .unwrap()
                .try_collect()
                .await
                .unwrap();
            assert_eq!(read, vectors);
        }
    }

    #[tokio::test]
    async fn test_static_rejects_writes() {
        let storage = storage();
        SnapshotCollection::publish("db-s", 1, &[], storage.clone())
            .await
            .unwrap();
        let collection = SnapshotCollection::new("db-s", 1, Some(0), storage);

        let err = collection.add(vec![LabeledVector::new(1, vec![1.0])]).await;
        assert!(matches!(err, Err(KnnError::Unsupported(_))));
        assert!(matches!(collection.remove(&[1]).await, Err(KnnError::Unsupported(_))));
        assert!(matches!(collection.cleanup_removed().await, Err(KnnError::Unsupported(_))));
        assert!(collection.changes_after(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_disagreement() {
        let storage = storage();
        SnapshotCollection::publish("db-s", 3, &[], storage.clone())
            .await
            .unwrap();
        let collection = SnapshotCollection::new("db-s", 2, None, storage);
        assert!(collection.read_stream().await.is_err());
    }
}
