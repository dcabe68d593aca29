//! HNSW node representation

use crate::vectors::Label;

/// A node in the HNSW graph
///
/// Nodes own their vector so the graph can be searched without a side store.
/// A node id is its position in the node list, which is also its insertion
/// order.
#[derive(Clone, Debug)]
pub struct HnswNode {
    /// External label this node answers to
    pub label: Label,
    pub vector: Vec<f32>,
    /// Maximum level this node exists at
    pub level: usize,
    /// Neighbors at each level (level 0 is index 0)
    pub neighbors: Vec<Vec<u32>>,
    /// Soft-deleted nodes stay in the graph for routing but are never returned
    pub deleted: bool,
}

impl HnswNode {
    pub fn new(label: Label, vector: Vec<f32>, level: usize) -> Self {
        Self {
            label,
            vector,
            level,
            neighbors: (0..=level).map(|_| Vec::new()).collect(),
            deleted: false,
        }
    }

    /// Get neighbors at a specific level
    pub fn neighbors_at(&self, level: usize) -> &[u32] {
        self.neighbors.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Add a neighbor at a specific level
    pub fn add_neighbor(&mut self, level: usize, neighbor: u32) {
        if let Some(list) = self.neighbors.get_mut(level) {
            if !list.contains(&neighbor) {
                list.push(neighbor);
            }
        }
    }

    /// Set neighbors at a specific level
    pub fn set_neighbors(&mut self, level: usize, neighbors: Vec<u32>) {
        if let Some(list) = self.neighbors.get_mut(level) {
            *list = neighbors;
        }
    }
}
