//! HNSW Adapter
//!
//! Wraps HnswIndex to implement the AnnIndex trait.

use std::fmt;

use crate::error::Result;
use crate::hnsw::HnswIndex;
use crate::vectors::Label;

use super::config::HnswParams;
use super::{AnnIndex, DistanceMetric};

/// Adapter that wraps HnswIndex to implement AnnIndex trait
pub struct HnswAdapter {
    inner: HnswIndex,
}

impl fmt::Debug for HnswAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HnswAdapter")
            .field("len", &self.inner.len())
            .field("capacity", &self.inner.capacity())
            .field("metric", &self.inner.metric())
            .field("params", self.inner.config())
            .finish()
    }
}

impl HnswAdapter {
    /// Create a new HNSW adapter with the given parameters
    pub fn new(params: HnswParams, dims: usize, capacity: usize, metric: DistanceMetric) -> Self {
        Self {
            inner: HnswIndex::new(params, dims, capacity, metric),
        }
    }

    /// Get the underlying HnswIndex
    pub fn inner(&self) -> &HnswIndex {
        &self.inner
    }

    /// Get the parameters
    pub fn params(&self) -> &HnswParams {
        self.inner.config()
    }
}

impl AnnIndex for HnswAdapter {
    fn dims(&self) -> usize {
        self.inner.dims()
    }

    fn metric(&self) -> DistanceMetric {
        self.inner.metric()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn insert(&self, label: Label, vector: &[f32]) -> Result<()> {
        self.inner.insert(label, vector)
    }

    fn soft_delete(&self, label: Label) -> bool {
        self.inner.mark_deleted(label)
    }

    fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<(Label, f32)>> {
        self.inner.search(query, k, None)
    }

    fn contains(&self, label: Label) -> bool {
        self.inner.contains(label)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn deleted_count(&self) -> usize {
        self.inner.deleted_count()
    }

    fn index_type_name(&self) -> &'static str {
        "HNSW"
    }
}
