//! HNSW search algorithms

use super::node::HnswNode;
use crate::index::DistanceMetric;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Candidate for search (min-heap by distance)
///
/// Equal distances are ordered by node id, so results are stable for a
/// given graph.
#[derive(Clone, Copy, Debug)]
pub struct Candidate {
    pub node_id: u32,
    pub distance: f32,
}

impl Candidate {
    fn key_cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then(self.node_id.cmp(&other.node_id))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.key_cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap (smaller distance = higher priority)
        other.key_cmp(self)
    }
}

/// Max-heap candidate (larger distance = higher priority, used for result pruning)
#[derive(Clone, Copy, Debug)]
pub struct MaxCandidate(pub Candidate);

impl PartialEq for MaxCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for MaxCandidate {}

impl PartialOrd for MaxCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MaxCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.key_cmp(&other.0)
    }
}

/// Greedy search to find single nearest node at a level
pub fn greedy_search_layer(
    nodes: &[HnswNode],
    query: &[f32],
    entry: u32,
    level: usize,
    metric: DistanceMetric,
) -> u32 {
    let mut current = entry;
    let mut current_dist = distance_to_node(nodes, query, current, metric);

    loop {
        let mut changed = false;
        for &neighbor_id in nodes[current as usize].neighbors_at(level) {
            let dist = distance_to_node(nodes, query, neighbor_id, metric);
            if dist < current_dist {
                current = neighbor_id;
                current_dist = dist;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    current
}

/// Search layer with ef candidates
///
/// With `skip_deleted`, tombstoned nodes are still expanded so the graph stays
/// navigable, but they never enter the result set.
pub fn search_layer(
    nodes: &[HnswNode],
    query: &[f32],
    entry: u32,
    ef: usize,
    level: usize,
    metric: DistanceMetric,
    skip_deleted: bool,
) -> Vec<Candidate> {
    let ef = ef.max(1);
    let entry = Candidate {
        node_id: entry,
        distance: distance_to_node(nodes, query, entry, metric),
    };

    let mut visited = HashSet::new();
    visited.insert(entry.node_id);

    // Min-heap for candidates to explore
    let mut candidates = BinaryHeap::new();
    candidates.push(entry);

    // Max-heap for results (worst at top for easy pruning)
    let mut results: BinaryHeap<MaxCandidate> = BinaryHeap::new();
    if !(skip_deleted && nodes[entry.node_id as usize].deleted) {
        results.push(MaxCandidate(entry));
    }

    let mut lower_bound = results.peek().map(|w| w.0.distance).unwrap_or(f32::INFINITY);

    while let Some(current) = candidates.pop() {
        // Stop if current is farther than worst result
        if current.distance > lower_bound && (results.len() >= ef || !skip_deleted) {
            break;
        }

        for &neighbor_id in nodes[current.node_id as usize].neighbors_at(level) {
            if !visited.insert(neighbor_id) {
                continue;
            }

            let dist = distance_to_node(nodes, query, neighbor_id, metric);
            if results.len() < ef || dist < lower_bound {
                let candidate = Candidate {
                    node_id: neighbor_id,
                    distance: dist,
                };
                candidates.push(candidate);

                if !(skip_deleted && nodes[neighbor_id as usize].deleted) {
                    results.push(MaxCandidate(candidate));
                }
                while results.len() > ef {
                    results.pop();
                }
                if let Some(worst) = results.peek() {
                    lower_bound = worst.0.distance;
                }
            }
        }
    }

    // Convert max-heap results to sorted vec
    let mut result_vec: Vec<Candidate> = results.into_iter().map(|mc| mc.0).collect();
    result_vec.sort_by(|a, b| a.key_cmp(b));
    result_vec
}

/// Compute distance from query to a node
#[inline]
pub fn distance_to_node(
    nodes: &[HnswNode],
    query: &[f32],
    node_id: u32,
    metric: DistanceMetric,
) -> f32 {
    metric.distance(query, &nodes[node_id as usize].vector)
}
