//! Mock storage implementation for local development
//!
//! Features:
//! - In-memory key-value tables (DynamoDB stand-in)
//! - Local filesystem object store (S3 stand-in)
//! - Configurable simulated latency
//! - Full API compatibility with the AWS backends

use super::*;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for mock storage behavior
#[derive(Debug, Clone)]
pub struct MockStorageConfig {
    /// Simulated table read/scan latency
    pub table_read_latency: Duration,
    /// Simulated table write latency
    pub table_write_latency: Duration,
    /// Simulated object PUT latency
    pub object_put_latency: Duration,
    /// Simulated object GET latency
    pub object_get_latency: Duration,
    /// Random latency variance (0.0 - 1.0)
    pub latency_variance: f64,
}

impl Default for MockStorageConfig {
    fn default() -> Self {
        Self {
            // Realistic single-digit-millisecond DynamoDB latencies
            table_read_latency: Duration::from_millis(4),
            table_write_latency: Duration::from_millis(8),
            // Realistic S3 latencies
            object_put_latency: Duration::from_millis(50),
            object_get_latency: Duration::from_millis(20),
            latency_variance: 0.2,
        }
    }
}

impl MockStorageConfig {
    /// Config for fast tests (no artificial latency)
    pub fn fast() -> Self {
        Self {
            table_read_latency: Duration::ZERO,
            table_write_latency: Duration::ZERO,
            object_put_latency: Duration::ZERO,
            object_get_latency: Duration::ZERO,
            latency_variance: 0.0,
        }
    }

    /// Config for realistic simulation
    pub fn realistic() -> Self {
        Self::default()
    }
}

async fn simulate_latency(base: Duration, variance: f64) {
    // Always yield so a zero-latency backend still behaves like a suspension point
    tokio::task::yield_now().await;

    if base.is_zero() {
        return;
    }

    let jitter = if variance > 0.0 {
        let factor = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * variance;
        base.mul_f64(factor)
    } else {
        base
    };

    sleep(jitter).await;
}

/// Mock DynamoDB (key-value tables held in memory)
pub struct MockTableStorage {
    tables: RwLock<HashMap<String, BTreeMap<RowKey, TableRow>>>,
    config: MockStorageConfig,
}

impl MockTableStorage {
    pub fn new(config: MockStorageConfig) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn missing(table: &str) -> StorageError {
        StorageError::TableNotFound {
            table: table.to_string(),
        }
    }
}

impl Default for MockTableStorage {
    fn default() -> Self {
        Self::new(MockStorageConfig::fast())
    }
}

#[async_trait]
impl TableStorage for MockTableStorage {
    async fn create_table(&self, table: &str) -> StorageResult<()> {
        simulate_latency(self.config.table_write_latency, self.config.latency_variance).await;
        self.tables.write().entry(table.to_string()).or_default();
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> StorageResult<()> {
        simulate_latency(self.config.table_write_latency, self.config.latency_variance).await;
        self.tables.write().remove(table);
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> StorageResult<bool> {
        tokio::task::yield_now().await;
        Ok(self.tables.read().contains_key(table))
    }

    async fn put(&self, table: &str, row: TableRow) -> StorageResult<()> {
        simulate_latency(self.config.table_write_latency, self.config.latency_variance).await;
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| Self::missing(table))?;
        rows.insert(row.key.clone(), row);
        Ok(())
    }

    async fn get(&self, table: &str, key: &RowKey) -> StorageResult<Option<TableRow>> {
        simulate_latency(self.config.table_read_latency, self.config.latency_variance).await;
        let tables = self.tables.read();
        let rows = tables.get(table).ok_or_else(|| Self::missing(table))?;
        Ok(rows.get(key).cloned())
    }

    async fn delete(&self, table: &str, key: &RowKey) -> StorageResult<()> {
        simulate_latency(self.config.table_write_latency, self.config.latency_variance).await;
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| Self::missing(table))?;
        rows.remove(key);
        Ok(())
    }

    async fn delete_if_timestamp(
        &self,
        table: &str,
        key: &RowKey,
        timestamp: i64,
    ) -> StorageResult<bool> {
        simulate_latency(self.config.table_write_latency, self.config.latency_variance).await;
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| Self::missing(table))?;
        if rows.get(key).map(|row| row.timestamp) != Some(timestamp) {
            return Ok(false);
        }
        rows.remove(key);
        Ok(true)
    }

    async fn scan(&self, table: &str, filter: ScanFilter) -> StorageResult<Vec<TableRow>> {
        simulate_latency(self.config.table_read_latency, self.config.latency_variance).await;
        let tables = self.tables.read();
        let rows = tables.get(table).ok_or_else(|| Self::missing(table))?;
        Ok(rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }
}

/// Mock S3 (object storage on the local filesystem)
pub struct MockObjectStorage {
    root: PathBuf,
    config: MockStorageConfig,
    // Keeps a temp root alive for as long as the store exists
    _temp: Option<tempfile::TempDir>,
}

impl MockObjectStorage {
    pub fn new(root: impl Into<PathBuf>, config: MockStorageConfig) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            config,
            _temp: None,
        })
    }

    /// Create with a temp directory that is removed on drop (for tests)
    pub fn temp(config: MockStorageConfig) -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        Ok(Self {
            root: temp_dir.path().to_path_buf(),
            config,
            _temp: Some(temp_dir),
        })
    }

    /// Get the root path (for diagnostics)
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStorage for MockObjectStorage {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        simulate_latency(self.config.object_put_latency, self.config.latency_variance).await;

        let full_path = self.full_path(key);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&full_path, &data)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        simulate_latency(self.config.object_get_latency, self.config.latency_variance).await;

        let full_path = self.full_path(key);
        if !full_path.exists() {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }

        Ok(Bytes::from(fs::read(&full_path)?))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.full_path(key).exists())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let full_path = self.full_path(key);
        if full_path.exists() {
            fs::remove_file(&full_path)?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let mut objects = Vec::new();

        fn visit_dir(
            base: &Path,
            current: &Path,
            prefix: &str,
            objects: &mut Vec<ObjectInfo>,
        ) -> std::io::Result<()> {
            if current.is_dir() {
                for entry in fs::read_dir(current)? {
                    let path = entry?.path();

                    if path.is_dir() {
                        visit_dir(base, &path, prefix, objects)?;
                        continue;
                    }

                    let Ok(relative) = path.strip_prefix(base) else {
                        continue;
                    };
                    let key = relative.to_string_lossy().to_string();

                    if key.starts_with(prefix) {
                        let metadata = fs::metadata(&path)?;
                        objects.push(ObjectInfo {
                            key,
                            size: metadata.len(),
                            last_modified: metadata
                                .modified()
                                .map(chrono::DateTime::from)
                                .unwrap_or_else(|_| chrono::Utc::now()),
                        });
                    }
                }
            }
            Ok(())
        }

        visit_dir(&self.root, &self.root, prefix, &mut objects)?;
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(objects)
    }
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

/// Create mock storage backend for development
pub fn create_mock_storage(
    object_root: impl Into<PathBuf>,
    config: MockStorageConfig,
) -> std::io::Result<StorageBackend> {
    let table = MockTableStorage::new(config.clone());
    let object = MockObjectStorage::new(object_root, config)?;

    Ok(StorageBackend::new(table, object))
}

/// Create mock storage with a temp object root (for tests)
pub fn create_temp_storage(config: MockStorageConfig) -> std::io::Result<StorageBackend> {
    let table = MockTableStorage::new(config.clone());
    let object = MockObjectStorage::temp(config)?;

    Ok(StorageBackend::new(table, object))
}
