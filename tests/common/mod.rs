//! Shared test utilities
//!
//! This module provides:
//! - Random and seeded vector generation
//! - The three-vector collection used throughout the engine tests
//! - Failing table storage wrapper for error injection
//! - A local deployment harness (orchestrator + in-process compute pool)

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use serverless_knn::collection::{Collection, MemoryCollection};
use serverless_knn::config::{CollectionConfig, DatabaseConfig, EngineConfig, SuperLambdaConfig};
use serverless_knn::deployer::Orchestrator;
use serverless_knn::invoker::LocalComputePool;
use serverless_knn::storage::mock::{MockObjectStorage, MockStorageConfig, MockTableStorage};
use serverless_knn::storage::{
    RowKey, ScanFilter, StorageBackend, StorageError, StorageResult, TableRow, TableStorage,
};
use serverless_knn::{LabeledVector, SuperLambda};

/// Generate a random normalized vector
pub fn random_vector(dims: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let v: Vec<f32> = (0..dims).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
    normalize(&v)
}

/// Generate a deterministic vector based on seed
pub fn seeded_vector(dims: usize, seed: u64) -> Vec<f32> {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let v: Vec<f32> = (0..dims).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
    normalize(&v)
}

/// Normalize a vector to unit length
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// `{1:[1,2,3], 2:[4,5,6], 3:[7,8,9]}`
pub fn scenario_vectors() -> Vec<LabeledVector> {
    vec![
        LabeledVector::new(1, vec![1.0, 2.0, 3.0]),
        LabeledVector::new(2, vec![4.0, 5.0, 6.0]),
        LabeledVector::new(3, vec![7.0, 8.0, 9.0]),
    ]
}

pub async fn scenario_collection() -> Arc<MemoryCollection> {
    let collection = Arc::new(MemoryCollection::new("shop-items", 3));
    collection.add(scenario_vectors()).await.unwrap();
    collection
}

/// Mock backend with no simulated latency
pub fn fast_backend() -> StorageBackend {
    StorageBackend::new(
        MockTableStorage::new(MockStorageConfig::fast()),
        MockObjectStorage::temp(MockStorageConfig::fast()).unwrap(),
    )
}

// ============================================================================
// FAILURE INJECTION
// ============================================================================

/// Failure injection mode for FailingTableStorage
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FailureMode {
    /// No failures
    None,
    /// Fail all operations
    FailAll,
    /// Fail the first N scans, then recover
    FailFirstScans(u64),
    /// Fail only writes (put/delete)
    FailWrites,
}

/// Table storage wrapper that can inject failures for testing
pub struct FailingTableStorage {
    inner: Arc<dyn TableStorage>,
    failure_mode: parking_lot::RwLock<FailureMode>,
    scans: AtomicU64,
}

impl FailingTableStorage {
    pub fn new(inner: Arc<dyn TableStorage>) -> Self {
        Self {
            inner,
            failure_mode: parking_lot::RwLock::new(FailureMode::None),
            scans: AtomicU64::new(0),
        }
    }

    /// Set the failure mode and reset the scan counter
    pub fn set_failure_mode(&self, mode: FailureMode) {
        *self.failure_mode.write() = mode;
        self.scans.store(0, Ordering::SeqCst);
    }

    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }

    fn check(&self, op_type: &str) -> StorageResult<()> {
        let mode = *self.failure_mode.read();
        let fail = match mode {
            FailureMode::None => false,
            FailureMode::FailAll => true,
            FailureMode::FailFirstScans(n) => {
                op_type == "scan" && self.scans.load(Ordering::SeqCst) <= n
            }
            FailureMode::FailWrites => op_type == "write",
        };

        if fail {
            Err(StorageError::Backend(format!("Injected {} failure", op_type)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TableStorage for FailingTableStorage {
    async fn create_table(&self, table: &str) -> StorageResult<()> {
        self.check("write")?;
        self.inner.create_table(table).await
    }

    async fn delete_table(&self, table: &str) -> StorageResult<()> {
        self.check("write")?;
        self.inner.delete_table(table).await
    }

    async fn table_exists(&self, table: &str) -> StorageResult<bool> {
        self.check("read")?;
        self.inner.table_exists(table).await
    }

    async fn put(&self, table: &str, row: TableRow) -> StorageResult<()> {
        self.check("write")?;
        self.inner.put(table, row).await
    }

    async fn get(&self, table: &str, key: &RowKey) -> StorageResult<Option<TableRow>> {
        self.check("read")?;
        self.inner.get(table, key).await
    }

    async fn delete(&self, table: &str, key: &RowKey) -> StorageResult<()> {
        self.check("write")?;
        self.inner.delete(table, key).await
    }

    async fn delete_if_timestamp(
        &self,
        table: &str,
        key: &RowKey,
        timestamp: i64,
    ) -> StorageResult<bool> {
        self.check("write")?;
        self.inner.delete_if_timestamp(table, key, timestamp).await
    }

    async fn scan(&self, table: &str, filter: ScanFilter) -> StorageResult<Vec<TableRow>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.check("scan")?;
        self.inner.scan(table, filter).await
    }
}

// ============================================================================
// LOCAL DEPLOYMENT
// ============================================================================

/// Invoker settings used by the failover scenarios
pub fn scenario_super_lambda() -> SuperLambdaConfig {
    SuperLambdaConfig {
        max_timeout: Duration::from_millis(500),
        max_retries: 1,
        retry_backoff: Duration::from_millis(50),
        main_region_fallbacks: 1,
    }
}

/// `shop` in us-east-1 with one secondary region: plans `shop-items-m0`,
/// `shop-items-m1` and `shop-items-eu-west-1`
pub fn scenario_database() -> DatabaseConfig {
    DatabaseConfig::new("shop", "us-east-1").with_secondary_regions(["eu-west-1"])
}

pub struct LocalDeployment {
    pub backend: StorageBackend,
    pub pool: Arc<LocalComputePool>,
    pub orchestrator: Orchestrator,
}

impl LocalDeployment {
    pub fn super_lambda(&self) -> SuperLambda {
        self.orchestrator.super_lambda(self.pool.clone())
    }
}

/// Deploy the scenario database with every instance bound to `collection`
pub async fn deploy_local(
    collection: Arc<dyn Collection>,
    super_lambda: SuperLambdaConfig,
) -> LocalDeployment {
    let backend = fast_backend();
    let pool = Arc::new(LocalComputePool::new(EngineConfig::default()).with_collection(collection));
    let orchestrator = Orchestrator::new(
        scenario_database(),
        CollectionConfig::dynamic("items", 3),
        super_lambda,
        backend.clone(),
        pool.clone(),
    )
    .unwrap();

    orchestrator.deploy().await.unwrap();
    LocalDeployment {
        backend,
        pool,
        orchestrator,
    }
}
