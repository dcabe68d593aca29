//! Storage type definitions

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{StorageError, StorageResult};

/// Object info from list operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: chrono::DateTime<chrono::Utc>,
}

/// Primary key of a table row (partition key + sort key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub partition: String,
    pub sort: String,
}

impl RowKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

/// A row in a key-value table
#[derive(Debug, Clone)]
pub struct TableRow {
    pub key: RowKey,
    /// Write time in epoch milliseconds, indexed for `ScanFilter::UpdatedAfter`
    pub timestamp: i64,
    pub body: Bytes,
}

impl TableRow {
    /// Build a row whose body is the JSON encoding of `value`
    pub fn json<T: Serialize>(key: RowKey, timestamp: i64, value: &T) -> StorageResult<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Self {
            key,
            timestamp,
            body: Bytes::from(body),
        })
    }

    /// Decode the JSON body
    pub fn decode<T: DeserializeOwned>(&self) -> StorageResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Server-side scan filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFilter {
    /// Every row
    All,
    /// Rows with `timestamp` strictly greater than the given value
    UpdatedAfter(i64),
}

impl ScanFilter {
    pub fn matches(&self, row: &TableRow) -> bool {
        match self {
            ScanFilter::All => true,
            ScanFilter::UpdatedAfter(since) => row.timestamp > *since,
        }
    }
}
