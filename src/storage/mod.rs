//! Storage abstraction layer
//!
//! Provides traits for key-value tables (DynamoDB-like) and object storage
//! (S3-like) with mock implementations for local development and real AWS
//! implementations for production.

pub mod mock;
pub mod types;

#[cfg(feature = "aws")]
pub mod aws;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub use types::*;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Key-value table trait (DynamoDB-like)
///
/// Rows are addressed by a partition + sort key pair and carry an opaque
/// body plus a numeric timestamp that scans can filter on server-side.
/// Writes overwrite the whole row.
#[async_trait]
pub trait TableStorage: Send + Sync + 'static {
    /// Create a table; succeeds if it already exists
    async fn create_table(&self, table: &str) -> StorageResult<()>;

    /// Delete a table and every row in it; succeeds if it is already gone
    async fn delete_table(&self, table: &str) -> StorageResult<()>;

    /// Check if a table exists
    async fn table_exists(&self, table: &str) -> StorageResult<bool>;

    /// Insert or overwrite a row
    async fn put(&self, table: &str, row: TableRow) -> StorageResult<()>;

    /// Fetch a single row
    async fn get(&self, table: &str, key: &RowKey) -> StorageResult<Option<TableRow>>;

    /// Delete a row (no-op if absent)
    async fn delete(&self, table: &str, key: &RowKey) -> StorageResult<()>;

    /// Delete a row only while its timestamp still equals `timestamp`.
    /// Returns false, without touching anything, if the row was rewritten or
    /// is already gone.
    async fn delete_if_timestamp(
        &self,
        table: &str,
        key: &RowKey,
        timestamp: i64,
    ) -> StorageResult<bool>;

    /// Full scan, optionally restricted to rows newer than a timestamp.
    /// Rows come back in key order.
    async fn scan(&self, table: &str, filter: ScanFilter) -> StorageResult<Vec<TableRow>>;
}

/// Object storage trait (S3-like)
///
/// Simulates an object store with:
/// - PUT/GET/DELETE operations
/// - No random access (whole-object only)
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Put object
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Get object
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Check if object exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete object
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List objects with prefix
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;
}

/// Combined storage backend
#[derive(Clone)]
pub struct StorageBackend {
    pub table: Arc<dyn TableStorage>,
    pub object: Arc<dyn ObjectStorage>,
}

impl StorageBackend {
    pub fn new(table: impl TableStorage, object: impl ObjectStorage) -> Self {
        Self {
            table: Arc::new(table),
            object: Arc::new(object),
        }
    }
}
