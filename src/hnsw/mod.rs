//! HNSW (Hierarchical Navigable Small World) index
//!
//! Key features:
//! - Vectors stored in the graph nodes, addressed by external label
//! - Soft delete: tombstoned nodes keep routing searches but are never returned
//! - Replace in place: upserting a known label rewires the existing node
//! - Capacity doubles on demand

pub mod insert;
pub mod node;
pub mod search;

use crate::error::{KnnError, Result};
use crate::index::{DistanceMetric, HnswParams};
use crate::vectors::{check_vector, Label};
use node::HnswNode;
use parking_lot::RwLock;
use std::collections::HashMap;

/// HNSW configuration - type alias for HnswParams (single source of truth)
pub type HnswConfig = HnswParams;

/// Graph state guarded by a single lock
#[derive(Debug, Default)]
pub struct HnswGraph {
    /// All nodes in the graph, indexed by node id
    pub(crate) nodes: Vec<HnswNode>,
    /// Label -> node id
    pub(crate) labels: HashMap<Label, u32>,
    /// Entry point (node with highest level)
    pub(crate) entry_point: Option<u32>,
    /// Maximum level in the graph
    pub(crate) max_level: usize,
    pub(crate) capacity: usize,
    /// Count of soft-deleted nodes
    pub(crate) deleted: usize,
}

/// HNSW index over labelled vectors
#[derive(Debug)]
pub struct HnswIndex {
    config: HnswConfig,
    metric: DistanceMetric,
    dims: usize,
    graph: RwLock<HnswGraph>,
}

impl HnswIndex {
    /// Create new empty index with room for `capacity` nodes
    pub fn new(config: HnswConfig, dims: usize, capacity: usize, metric: DistanceMetric) -> Self {
        Self {
            config,
            metric,
            dims,
            graph: RwLock::new(HnswGraph {
                nodes: Vec::with_capacity(capacity),
                capacity,
                ..Default::default()
            }),
        }
    }

    /// Insert a vector, replacing the stored one if the label exists
    pub fn insert(&self, label: Label, vector: &[f32]) -> Result<()> {
        check_vector(self.dims, vector)?;

        let mut graph = self.graph.write();
        match graph.labels.get(&label).copied() {
            Some(node_id) => {
                insert::replace_node(&mut graph, &self.config, self.metric, node_id, vector.to_vec())
            }
            None => {
                insert::insert_node(&mut graph, &self.config, self.metric, label, vector.to_vec());
            }
        }
        Ok(())
    }

    /// Mark a label deleted. Returns `true` if it was live.
    pub fn mark_deleted(&self, label: Label) -> bool {
        let mut graph = self.graph.write();
        let Some(node_id) = graph.labels.get(&label).copied() else {
            return false;
        };

        let node = &mut graph.nodes[node_id as usize];
        if node.deleted {
            return false;
        }
        node.deleted = true;
        graph.deleted += 1;
        true
    }

    /// Search for k nearest live neighbors
    pub fn search(&self, query: &[f32], k: usize, ef: Option<usize>) -> Result<Vec<(Label, f32)>> {
        if query.len() != self.dims {
            return Err(KnnError::dimension_mismatch(self.dims, query.len()));
        }

        let graph = self.graph.read();
        let Some(entry) = graph.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 || graph.nodes.len() == graph.deleted {
            return Ok(Vec::new());
        }

        let mut current = entry;

        // Phase 1: Greedy search from top level to level 1
        for level in (1..=graph.max_level).rev() {
            current = search::greedy_search_layer(&graph.nodes, query, current, level, self.metric);
        }

        // Phase 2: Search layer 0 with ef candidates
        let ef = ef.unwrap_or(self.config.ef_search).max(k);
        let candidates =
            search::search_layer(&graph.nodes, query, current, ef, 0, self.metric, true);

        Ok(candidates
            .into_iter()
            .take(k)
            .map(|c| (graph.nodes[c.node_id as usize].label, c.distance))
            .collect())
    }

    pub fn contains(&self, label: Label) -> bool {
        let graph = self.graph.read();
        graph
            .labels
            .get(&label)
            .is_some_and(|&id| !graph.nodes[id as usize].deleted)
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        let graph = self.graph.read();
        graph.nodes.len() - graph.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deleted_count(&self) -> usize {
        self.graph.read().deleted
    }

    pub fn capacity(&self) -> usize {
        self.graph.read().capacity
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(v: &[f32]) -> Vec<f32> {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter().map(|x| x / norm).collect()
        } else {
            v.to_vec()
        }
    }

    fn index(dims: usize, capacity: usize) -> HnswIndex {
        HnswIndex::new(HnswConfig::with_m(4), dims, capacity, DistanceMetric::L2)
    }

    #[test]
    fn test_hnsw_insert_and_search() {
        let index = index(4, 16);

        for i in 0..10u64 {
            let f = i as f32;
            index.insert(i, &normalize(&[f, f * 2.0, f * 3.0, f * 4.0 + 1.0])).unwrap();
        }
        assert_eq!(index.len(), 10);

        let query = normalize(&[3.0, 6.0, 9.0, 13.0]);
        let results = index.search(&query, 5, None).unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(results[0].0, 3);
        assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_exact_on_small_sets() {
        let index = index(2, 8);
        for i in 0..20u64 {
            index.insert(i, &[i as f32, 0.0]).unwrap();
        }

        let results = index.search(&[7.2, 0.0], 3, None).unwrap();
        let labels: Vec<u64> = results.iter().map(|r| r.0).collect();
        assert_eq!(labels, vec![7, 8, 6]);
    }

    #[test]
    fn test_soft_delete_hides_label() {
        let index = index(2, 8);
        index.insert(1, &[0.0, 0.0]).unwrap();
        index.insert(2, &[1.0, 0.0]).unwrap();

        assert!(index.mark_deleted(1));
        assert!(!index.mark_deleted(1));
        assert!(!index.mark_deleted(99));
        assert!(!index.contains(1));
        assert_eq!(index.len(), 1);

        let results = index.search(&[0.0, 0.0], 5, None).unwrap();
        assert_eq!(results, vec![(2, 1.0)]);
    }

    #[test]
    fn test_all_deleted_returns_empty() {
        let index = index(1, 4);
        index.insert(1, &[1.0]).unwrap();
        index.mark_deleted(1);
        assert!(index.search(&[1.0], 3, None).unwrap().is_empty());
    }

    #[test]
    fn test_replace_in_place() {
        let index = index(2, 8);
        index.insert(1, &[0.0, 0.0]).unwrap();
        index.insert(2, &[10.0, 0.0]).unwrap();
        index.insert(1, &[10.0, 1.0]).unwrap();

        assert_eq!(index.len(), 2);
        let results = index.search(&[10.0, 1.0], 1, None).unwrap();
        assert_eq!(results[0], (1, 0.0));
    }

    #[test]
    fn test_replace_revives_deleted() {
        let index = index(1, 4);
        index.insert(5, &[1.0]).unwrap();
        index.mark_deleted(5);
        index.insert(5, &[2.0]).unwrap();

        assert!(index.contains(5));
        assert_eq!(index.deleted_count(), 0);
        assert_eq!(index.search(&[2.0], 1, None).unwrap(), vec![(5, 0.0)]);
    }

    #[test]
    fn test_capacity_grows() {
        let index = index(1, 2);
        for i in 0..5u64 {
            index.insert(i, &[i as f32]).unwrap();
        }
        assert_eq!(index.len(), 5);
        assert!(index.capacity() >= 5);
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        let index = index(1, 4);
        index.insert(30, &[1.0]).unwrap();
        index.insert(10, &[-1.0]).unwrap();
        index.insert(20, &[1.0]).unwrap();

        let labels: Vec<u64> = index
            .search(&[0.0], 3, None)
            .unwrap()
            .into_iter()
            .map(|r| r.0)
            .collect();
        assert_eq!(labels, vec![30, 10, 20]);
    }

    #[test]
    fn test_dimension_checks() {
        let index = index(3, 4);
        assert!(index.insert(1, &[1.0]).is_err());
        assert!(index.search(&[1.0], 1, None).is_err());
    }
}
