//! Process-local collection

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{sort_changes, validate_batch, Collection, CollectionType, VectorStream};
use crate::error::Result;
use crate::vectors::{ChangeRecord, Label, LabeledVector, Timestamp};

/// Latest change record per label, held in memory
pub struct MemoryCollection {
    name: String,
    dims: usize,
    records: RwLock<BTreeMap<Label, ChangeRecord>>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>, dims: usize) -> Self {
        Self {
            name: name.into(),
            dims,
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CollectionType {
        CollectionType::Dynamic
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn size(&self) -> Result<usize> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| !r.is_tombstone())
            .count())
    }

    async fn read_stream(&self) -> Result<VectorStream> {
        let live: Vec<LabeledVector> = self
            .records
            .read()
            .values()
            .filter_map(|r| r.clone().into_labeled())
            .collect();

        Ok(futures::stream::iter(live.into_iter().map(Ok)).boxed())
    }

    async fn add_at(&self, vectors: Vec<LabeledVector>, timestamp: Timestamp) -> Result<()> {
        validate_batch(self.dims, &vectors)?;

        let mut records = self.records.write();
        for item in vectors {
            records.insert(
                item.label,
                ChangeRecord::upsert(item.label, item.vector, timestamp),
            );
        }
        Ok(())
    }

    async fn remove_at(&self, labels: &[Label], timestamp: Timestamp) -> Result<()> {
        let mut records = self.records.write();
        for &label in labels {
            records.insert(label, ChangeRecord::tombstone(label, timestamp));
        }
        Ok(())
    }

    async fn changes_after(&self, timestamp: Timestamp) -> Result<Vec<ChangeRecord>> {
        let mut changes: Vec<ChangeRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.timestamp > timestamp)
            .cloned()
            .collect();
        sort_changes(&mut changes);
        Ok(changes)
    }
}
