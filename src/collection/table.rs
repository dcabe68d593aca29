//! Key-value table collection
//!
//! One row per label: partition key is the label, sort key is fixed. The row
//! body holds the latest change record as JSON and the row timestamp mirrors
//! the record's, so `changes_after` is pushed down to the table scan.

use async_trait::async_trait;
use futures::future::try_join_all;
use futures::StreamExt;
use std::sync::Arc;

use super::{sort_changes, validate_batch, Collection, CollectionType, VectorStream};
use crate::error::Result;
use crate::storage::{RowKey, ScanFilter, StorageResult, TableRow, TableStorage};
use crate::vectors::{ChangeRecord, Label, LabeledVector, Timestamp};

const SORT_KEY: &str = "vector";

pub struct TableCollection {
    table: String,
    dims: usize,
    storage: Arc<dyn TableStorage>,
}

impl TableCollection {
    pub fn new(table: impl Into<String>, dims: usize, storage: Arc<dyn TableStorage>) -> Self {
        Self {
            table: table.into(),
            dims,
            storage,
        }
    }

    fn row_key(label: Label) -> RowKey {
        RowKey::new(label.to_string(), SORT_KEY)
    }

    async fn put_records(&self, records: Vec<ChangeRecord>) -> Result<()> {
        let rows = records
            .iter()
            .map(|r| TableRow::json(Self::row_key(r.label), r.timestamp, r))
            .collect::<StorageResult<Vec<_>>>()?;

        try_join_all(rows.into_iter().map(|row| self.storage.put(&self.table, row))).await?;
        Ok(())
    }

    async fn scan_records(&self, filter: ScanFilter) -> Result<Vec<ChangeRecord>> {
        let rows = self.storage.scan(&self.table, filter).await?;
        let records = rows
            .iter()
            .map(|row| row.decode::<ChangeRecord>())
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(records)
    }
}

#[async_trait]
impl Collection for TableCollection {
    fn name(&self) -> &str {
        &self.table
    }

    fn kind(&self) -> CollectionType {
        CollectionType::Dynamic
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn size(&self) -> Result<usize> {
        let records = self.scan_records(ScanFilter::All).await?;
        Ok(records.iter().filter(|r| !r.is_tombstone()).count())
    }

    async fn read_stream(&self) -> Result<VectorStream> {
        let (_, stream) = self.sized_stream().await?;
        Ok(stream)
    }

    async fn sized_stream(&self) -> Result<(usize, VectorStream)> {
        let live: Vec<LabeledVector> = self
            .scan_records(ScanFilter::All)
            .await?
            .into_iter()
            .filter_map(ChangeRecord::into_labeled)
            .collect();
        Ok((live.len(), futures::stream::iter(live.into_iter().map(Ok)).boxed()))
    }

    async fn add_at(&self, vectors: Vec<LabeledVector>, timestamp: Timestamp) -> Result<()> {
        validate_batch(self.dims, &vectors)?;

        let count = vectors.len();
        let records = vectors
            .into_iter()
            .map(|item| ChangeRecord::upsert(item.label, item.vector, timestamp))
            .collect();
        self.put_records(records).await?;

        tracing::debug!(table = %self.table, count, timestamp, "Vectors written");
        Ok(())
    }

    async fn remove_at(&self, labels: &[Label], timestamp: Timestamp) -> Result<()> {
        let records = labels
            .iter()
            .map(|&label| ChangeRecord::tombstone(label, timestamp))
            .collect();
        self.put_records(records).await?;

        tracing::debug!(table = %self.table, count = labels.len(), timestamp, "Vectors tombstoned");
        Ok(())
    }

    async fn changes_after(&self, timestamp: Timestamp) -> Result<Vec<ChangeRecord>> {
        let mut changes = self.scan_records(ScanFilter::UpdatedAfter(timestamp)).await?;
        sort_changes(&mut changes);
        Ok(changes)
    }

    async fn cleanup_removed(&self) -> Result<usize> {
        let tombstones: Vec<(RowKey, Timestamp)> = self
            .scan_records(ScanFilter::All)
            .await?
            .into_iter()
            .filter(|r| r.is_tombstone())
            .map(|r| (Self::row_key(r.label), r.timestamp))
            .collect();

        // A label re-upserted since the scan has a newer timestamp and survives
        let deleted = try_join_all(
            tombstones
                .iter()
                .map(|(key, ts)| self.storage.delete_if_timestamp(&self.table, key, *ts)),
        )
        .await?;
        let removed = deleted.into_iter().filter(|&d| d).count();

        tracing::info!(
            table = %self.table,
            removed,
            skipped = tombstones.len() - removed,
            "Tombstones cleaned up"
        );
        Ok(removed)
    }
}
