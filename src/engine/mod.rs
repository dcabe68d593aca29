//! KNN index engine
//!
//! One engine per warm compute instance. It owns the in-memory ANN index,
//! builds it from the bound collection on first use, and absorbs incremental
//! changes afterwards.
//!
//! ```text
//!   Uninitialized ──ensure_ready()──▶ Bootstrapping ──scan done──▶ Ready
//!         ▲                                │                        │ ⟲ search / update
//!         └──────── scan failed ───────────┘                        │
//! ```
//!
//! There is no way back from `Ready`: an instance that needs a full rebuild
//! is recycled and a fresh engine bootstraps.

mod registry;

pub use registry::EngineRegistry;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

use crate::collection::{Collection, CollectionType};
use crate::config::EngineConfig;
use crate::error::{KnnError, Result};
use crate::index::{create_index, AnnIndex};
use crate::vectors::{check_vector, now_millis, ChangeKind, ChangeRecord, Label, Timestamp};

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EngineState {
    Uninitialized = 0,
    Bootstrapping = 1,
    Ready = 2,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Bootstrapping,
            2 => EngineState::Ready,
            _ => EngineState::Uninitialized,
        }
    }
}

/// Top-k answer in wire order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub neighbors: Vec<Label>,
    pub distances: Vec<f32>,
}

impl FromIterator<(Label, f32)> for SearchResult {
    fn from_iter<I: IntoIterator<Item = (Label, f32)>>(iter: I) -> Self {
        let (neighbors, distances) = iter.into_iter().unzip();
        Self {
            neighbors,
            distances,
        }
    }
}

/// Engine statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub state: EngineState,
    pub collection: String,
    pub dimensions: usize,
    pub index_type: Option<String>,
    pub live_vectors: usize,
    pub deleted_vectors: usize,
    pub capacity: usize,
    pub last_update_timestamp: Timestamp,
    pub searches: u64,
    pub updates: u64,
}

pub struct KnnEngine {
    collection: Arc<dyn Collection>,
    config: EngineConfig,
    state: AtomicU8,
    index: OnceCell<Arc<dyn AnnIndex>>,
    last_update: AtomicI64,
    searches: AtomicU64,
    updates: AtomicU64,
}

impl KnnEngine {
    pub fn new(collection: Arc<dyn Collection>, config: EngineConfig) -> Self {
        Self {
            collection,
            config,
            state: AtomicU8::new(EngineState::Uninitialized as u8),
            index: OnceCell::new(),
            last_update: AtomicI64::new(0),
            searches: AtomicU64::new(0),
            updates: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn collection(&self) -> &Arc<dyn Collection> {
        &self.collection
    }

    pub fn dimensions(&self) -> usize {
        self.collection.dimensions()
    }

    /// Timestamp of the last bootstrap start or applied update batch
    pub fn last_time_updated(&self) -> Timestamp {
        self.last_update.load(Ordering::Acquire)
    }

    /// Index capacity for a collection of `size` live vectors
    pub fn initial_capacity(&self, kind: CollectionType, size: usize) -> usize {
        match kind {
            CollectionType::Static => size,
            CollectionType::Dynamic => {
                (size * crate::defaults::DYNAMIC_CAPACITY_MULTIPLIER).max(self.config.capacity_floor)
            }
        }
    }

    /// Bootstrap on first call; concurrent callers wait for the same scan
    pub async fn ensure_ready(&self) -> Result<Arc<dyn AnnIndex>> {
        self.index
            .get_or_try_init(|| self.bootstrap())
            .await
            .cloned()
    }

    async fn bootstrap(&self) -> Result<Arc<dyn AnnIndex>> {
        self.state
            .store(EngineState::Bootstrapping as u8, Ordering::Release);

        match self.scan_collection().await {
            Ok(index) => {
                self.state.store(EngineState::Ready as u8, Ordering::Release);
                Ok(index)
            }
            Err(e) => {
                tracing::error!(collection = %self.collection.name(), error = %e, "Bootstrap failed");
                self.state
                    .store(EngineState::Uninitialized as u8, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn scan_collection(&self) -> Result<Arc<dyn AnnIndex>> {
        let started = Instant::now();
        let dims = self.collection.dimensions();
        // Writes landing during the scan are newer than this and get picked up
        // by the next changes_after
        let scan_started_at = now_millis();

        let (size, mut stream) = self.collection.sized_stream().await?;
        let capacity = self.initial_capacity(self.collection.kind(), size);

        let index = create_index(
            &self.config.create_index_config(),
            dims,
            capacity,
            self.config.metric,
        );

        let mut loaded = 0usize;
        while let Some(item) = stream.next().await {
            let item = item?;
            index.insert(item.label, &item.vector)?;
            loaded += 1;
        }

        self.last_update.fetch_max(scan_started_at, Ordering::AcqRel);

        tracing::info!(
            collection = %self.collection.name(),
            vectors = loaded,
            capacity,
            index = index.index_type_name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Index bootstrapped"
        );

        Ok(index)
    }

    /// Approximate top-k over live vectors
    pub async fn search(&self, query: &[f32], k: usize) -> Result<SearchResult> {
        if k == 0 {
            return Err(KnnError::invalid_input("k must be positive"));
        }
        check_vector(self.dimensions(), query)?;

        let index = self.ensure_ready().await?;
        let hits = index.search_knn(query, k)?;
        self.searches.fetch_add(1, Ordering::Relaxed);

        Ok(hits.into_iter().collect())
    }

    /// Apply a batch of changes in order. The batch is validated up front so
    /// a malformed change leaves the index untouched. Re-applying a batch is
    /// harmless.
    pub async fn update(&self, changes: &[ChangeRecord]) -> Result<()> {
        let dims = self.dimensions();
        for change in changes {
            if let ChangeKind::Upsert(vector) = change.kind()? {
                check_vector(dims, vector)?;
            }
        }

        let index = self.ensure_ready().await?;
        let applied_at = now_millis();
        let mut deleted = 0usize;

        for change in changes {
            match change.kind()? {
                ChangeKind::Upsert(vector) => index.insert(change.label, vector)?,
                ChangeKind::Tombstone => {
                    if index.soft_delete(change.label) {
                        deleted += 1;
                    }
                }
            }
        }

        self.last_update.fetch_max(applied_at, Ordering::AcqRel);
        self.updates.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            changes = changes.len(),
            deleted,
            last_update = applied_at,
            "Update batch applied"
        );
        Ok(())
    }

    /// Pull `changes_after(last_time_updated)` from the collection and apply
    /// it. Returns the number of changes applied.
    pub async fn refresh(&self) -> Result<usize> {
        self.ensure_ready().await?;

        let since = self.last_time_updated();
        let changes = self.collection.changes_after(since).await?;
        if changes.is_empty() {
            return Ok(0);
        }

        self.update(&changes).await?;
        tracing::debug!(since, applied = changes.len(), "Caught up from collection");
        Ok(changes.len())
    }

    pub fn stats(&self) -> EngineStats {
        let index = self.index.get();
        EngineStats {
            state: self.state(),
            collection: self.collection.name().to_string(),
            dimensions: self.dimensions(),
            index_type: index.map(|i| i.index_type_name().to_string()),
            live_vectors: index.map_or(0, |i| i.len()),
            deleted_vectors: index.map_or(0, |i| i.deleted_count()),
            capacity: index.map_or(0, |i| i.capacity()),
            last_update_timestamp: self.last_time_updated(),
            searches: self.searches.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use crate::vectors::LabeledVector;

    async fn scenario_engine() -> KnnEngine {
        let collection = Arc::new(MemoryCollection::new("db-c", 3));
        collection
            .add(vec![
                LabeledVector::new(1, vec![1.0, 2.0, 3.0]),
                LabeledVector::new(2, vec![4.0, 5.0, 6.0]),
                LabeledVector::new(3, vec![7.0, 8.0, 9.0]),
            ])
            .await
            .unwrap();
        KnnEngine::new(collection, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_bootstrap_on_first_search() {
        let engine = scenario_engine().await;
        assert_eq!(engine.state(), EngineState::Uninitialized);

        let before = now_millis();
        let result = engine.search(&[1.0, 2.0, 3.0], 3).await.unwrap();
        assert_eq!(result.neighbors, vec![1, 2, 3]);
        assert_eq!(result.distances, vec![0.0, 27.0, 108.0]);

        assert_eq!(engine.state(), EngineState::Ready);
        assert!(engine.last_time_updated() >= before);
        assert_eq!(engine.stats().capacity, crate::defaults::DEFAULT_CAPACITY_FLOOR);
    }

    #[tokio::test]
    async fn test_tombstone_update() {
        let engine = scenario_engine().await;
        engine
            .update(&[ChangeRecord::tombstone(1, 10)])
            .await
            .unwrap();

        let result = engine.search(&[1.0, 2.0, 3.0], 3).await.unwrap();
        assert_eq!(result.neighbors, vec![2, 3]);
        assert_eq!(result.distances, vec![27.0, 108.0]);
    }

    #[tokio::test]
    async fn test_update_advances_timestamp() {
        let engine = scenario_engine().await;
        engine.ensure_ready().await.unwrap();
        let bootstrapped = engine.last_time_updated();

        engine
            .update(&[ChangeRecord::upsert(9, vec![0.0, 0.0, 0.0], 1)])
            .await
            .unwrap();
        assert!(engine.last_time_updated() >= bootstrapped);
        assert_eq!(engine.stats().live_vectors, 4);
    }

    #[tokio::test]
    async fn test_bad_update_leaves_index_untouched() {
        let engine = scenario_engine().await;
        let batch = [
            ChangeRecord::tombstone(1, 1),
            ChangeRecord::upsert(4, vec![1.0], 1),
        ];
        assert!(engine.update(&batch).await.unwrap_err().is_client_error());

        let result = engine.search(&[1.0, 2.0, 3.0], 1).await.unwrap();
        assert_eq!(result.neighbors, vec![1]);
    }

    #[tokio::test]
    async fn test_rejects_bad_queries() {
        let engine = scenario_engine().await;
        assert!(matches!(
            engine.search(&[1.0, 2.0], 1).await,
            Err(KnnError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(engine.search(&[1.0, 2.0, 3.0], 0).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_pulls_new_writes() {
        let collection = Arc::new(MemoryCollection::new("db-c", 1));
        let engine = KnnEngine::new(collection.clone(), EngineConfig::default());
        engine.ensure_ready().await.unwrap();

        let later = engine.last_time_updated() + 1;
        collection
            .add_at(vec![LabeledVector::new(5, vec![2.0])], later)
            .await
            .unwrap();

        assert_eq!(engine.refresh().await.unwrap(), 1);
        assert_eq!(engine.search(&[2.0], 1).await.unwrap().neighbors, vec![5]);
    }

    #[tokio::test]
    async fn test_static_capacity_is_exact() {
        let engine = scenario_engine().await;
        assert_eq!(engine.initial_capacity(CollectionType::Static, 42), 42);
        assert_eq!(engine.initial_capacity(CollectionType::Dynamic, 42), 10_000);
        assert_eq!(engine.initial_capacity(CollectionType::Dynamic, 8_000), 16_000);
    }
}
