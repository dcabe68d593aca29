//! ANN Index abstraction layer
//!
//! This module provides a trait-based abstraction over different ANN (Approximate Nearest Neighbor)
//! index implementations, allowing the engine to work with multiple backends:
//!
//! - **HNSW** (default): In-memory Hierarchical Navigable Small World graph
//! - **Flat**: exhaustive scan, exact results
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       KnnEngine                              │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │              Arc<dyn AnnIndex>                          ││
//! │  │  ┌───────────────────┐  ┌───────────────────────────┐  ││
//! │  │  │   HnswAdapter     │  │   FlatIndex               │  ││
//! │  │  │   (wraps HNSW)    │  │   (exhaustive)            │  ││
//! │  │  └───────────────────┘  └───────────────────────────┘  ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use serverless_knn::index::{create_index, AnnIndexConfig, DistanceMetric};
//!
//! let index = create_index(&AnnIndexConfig::hnsw(), 384, 10_000, DistanceMetric::L2);
//! index.insert(7, &embedding)?;
//! let hits = index.search_knn(&query, 10)?;
//! ```

mod config;
mod distance;
mod flat;
mod hnsw_adapter;
mod r#trait;

pub use config::{AnnIndexConfig, HnswParams};
pub use distance::DistanceMetric;
pub use flat::FlatIndex;
pub use hnsw_adapter::HnswAdapter;
pub use r#trait::{AnnIndex, AnnIndexExt};

use std::sync::Arc;

/// Create a new, empty ANN index sized for `capacity` vectors
pub fn create_index(
    config: &AnnIndexConfig,
    dims: usize,
    capacity: usize,
    metric: DistanceMetric,
) -> Arc<dyn AnnIndex> {
    match config {
        AnnIndexConfig::Hnsw(params) => {
            Arc::new(HnswAdapter::new(params.clone(), dims, capacity, metric))
        }
        AnnIndexConfig::Flat => Arc::new(FlatIndex::new(dims, capacity, metric)),
    }
}
