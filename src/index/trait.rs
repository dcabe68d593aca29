//! ANN Index trait abstraction
//!
//! Provides a common interface for different ANN (Approximate Nearest Neighbor)
//! index implementations, allowing the engine's bootstrap and update logic to
//! stay independent of the concrete graph.

use std::fmt::Debug;

use super::DistanceMetric;
use crate::error::Result;
use crate::vectors::Label;

/// Common interface for all ANN index implementations
///
/// Indexes own their vectors and are addressed by label. Implementations use
/// interior locking so a shared `Arc<dyn AnnIndex>` can be searched while
/// another task holds it.
pub trait AnnIndex: Send + Sync + Debug + 'static {
    /// Dimensionality every vector must have
    fn dims(&self) -> usize;

    /// Metric the index was initialized with
    fn metric(&self) -> DistanceMetric;

    /// Current allocated capacity (grows on demand)
    fn capacity(&self) -> usize;

    /// Insert a vector, or replace it in place if the label already exists.
    /// Replacing a soft-deleted label revives it.
    fn insert(&self, label: Label, vector: &[f32]) -> Result<()>;

    /// Tombstone a label so it is no longer returned by searches.
    /// Returns `true` if the label was live.
    fn soft_delete(&self, label: Label) -> bool;

    /// Search for the k nearest live vectors
    ///
    /// # Returns
    /// `(label, distance)` pairs sorted by distance ascending, ties broken by
    /// insertion order
    fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<(Label, f32)>>;

    /// Whether a live (not soft-deleted) vector exists for `label`
    fn contains(&self, label: Label) -> bool;

    /// Number of live vectors
    fn len(&self) -> usize;

    /// Check if the index has no live vectors
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of soft-deleted vectors still occupying slots
    fn deleted_count(&self) -> usize;

    /// Get the name of this index type (for logging/debugging)
    fn index_type_name(&self) -> &'static str;
}

/// Extension trait for AnnIndex that provides utility methods
pub trait AnnIndexExt: AnnIndex {
    /// Batch insert multiple vectors, stopping at the first error
    fn insert_batch<'a>(&self, items: impl IntoIterator<Item = (Label, &'a [f32])>) -> Result<usize> {
        let mut count = 0;
        for (label, vector) in items {
            self.insert(label, vector)?;
            count += 1;
        }
        Ok(count)
    }
}

// Blanket implementation
impl<T: AnnIndex + ?Sized> AnnIndexExt for T {}
