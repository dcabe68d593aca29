//! HNSW insert algorithms

use super::node::HnswNode;
use super::search::{greedy_search_layer, search_layer, Candidate};
use super::{HnswConfig, HnswGraph};
use crate::index::DistanceMetric;
use crate::vectors::Label;
use rand::Rng;
use std::cmp::Ordering;

/// Insert a node for a label the graph has not seen before
pub fn insert_node(
    graph: &mut HnswGraph,
    config: &HnswConfig,
    metric: DistanceMetric,
    label: Label,
    vector: Vec<f32>,
) -> u32 {
    if graph.nodes.len() >= graph.capacity {
        let grown = (graph.capacity * 2).max(1);
        tracing::debug!(from = graph.capacity, to = grown, "Growing HNSW capacity");
        graph.nodes.reserve(grown - graph.nodes.len());
        graph.capacity = grown;
    }

    // Generate random level for this node
    let level = random_level(config.ml);
    let new_node_id = graph.nodes.len() as u32;

    graph.nodes.push(HnswNode::new(label, vector, level));
    graph.labels.insert(label, new_node_id);

    // Handle first node
    if graph.entry_point.is_none() {
        graph.entry_point = Some(new_node_id);
        graph.max_level = level;
        return new_node_id;
    }

    let current_max_level = graph.max_level;
    connect_node(graph, config, metric, new_node_id);

    // Update entry point if new node has higher level
    if level > current_max_level {
        graph.entry_point = Some(new_node_id);
        graph.max_level = level;
    }

    new_node_id
}

/// Overwrite the vector of an existing node and rebuild its links.
/// The node keeps its id, so its insertion order is unchanged.
pub fn replace_node(
    graph: &mut HnswGraph,
    config: &HnswConfig,
    metric: DistanceMetric,
    node_id: u32,
    vector: Vec<f32>,
) {
    let node = &mut graph.nodes[node_id as usize];
    node.vector = vector;
    if node.deleted {
        node.deleted = false;
        graph.deleted -= 1;
    }
    connect_node(graph, config, metric, node_id);
}

/// Link `node_id` into every level it lives on, searching from the current
/// entry point
fn connect_node(graph: &mut HnswGraph, config: &HnswConfig, metric: DistanceMetric, node_id: u32) {
    let Some(entry_point) = graph.entry_point else {
        return;
    };
    let level = graph.nodes[node_id as usize].level;
    let query = graph.nodes[node_id as usize].vector.clone();

    // Traverse from top to the node's level + 1 (greedy search)
    let mut current = entry_point;
    for l in (level + 1..=graph.max_level).rev() {
        current = greedy_search_layer(&graph.nodes, &query, current, l, metric);
    }

    // Insert at each level from level down to 0
    for l in (0..=level.min(graph.max_level)).rev() {
        let candidates = search_layer(
            &graph.nodes,
            &query,
            current,
            config.ef_construction,
            l,
            metric,
            false,
        );

        let max_neighbors = if l == 0 { config.m_max0 } else { config.m };
        let selected = select_neighbors_heuristic(&candidates, max_neighbors, node_id);

        graph.nodes[node_id as usize].set_neighbors(l, selected.clone());

        // Create bidirectional edges
        for &neighbor_id in &selected {
            graph.nodes[neighbor_id as usize].add_neighbor(l, node_id);
            if graph.nodes[neighbor_id as usize].neighbors_at(l).len() > max_neighbors {
                prune_neighbors(&mut graph.nodes, neighbor_id, l, max_neighbors, metric);
            }
        }

        // Use closest neighbor as entry point for next level
        if let Some(closest) = candidates.iter().find(|c| c.node_id != node_id) {
            current = closest.node_id;
        }
    }
}

/// Shrink a neighbor list back to its closest `max_n` entries
fn prune_neighbors(
    nodes: &mut [HnswNode],
    node_id: u32,
    level: usize,
    max_n: usize,
    metric: DistanceMetric,
) {
    let base = &nodes[node_id as usize];
    let mut scored: Vec<(u32, f32)> = base
        .neighbors_at(level)
        .iter()
        .map(|&n| (n, metric.distance(&base.vector, &nodes[n as usize].vector)))
        .collect();

    scored.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let pruned = scored.into_iter().take(max_n).map(|(id, _)| id).collect();
    nodes[node_id as usize].set_neighbors(level, pruned);
}

/// Generate random level using exponential distribution
fn random_level(ml: f64) -> usize {
    let mut rng = rand::thread_rng();
    let r: f64 = rng.gen_range(f64::EPSILON..1.0);
    (-r.ln() * ml).floor() as usize
}

/// Select neighbors - simple approach (closest M) which works well for high-dimensional vectors
/// Candidates must be sorted by distance to the query vector
fn select_neighbors_heuristic(candidates: &[Candidate], max_count: usize, exclude: u32) -> Vec<u32> {
    candidates
        .iter()
        .map(|c| c.node_id)
        .filter(|&id| id != exclude)
        .take(max_count)
        .collect()
}
