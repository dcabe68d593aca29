//! Exhaustive (flat) index
//!
//! Scans every live vector. Same contract as the graph index, but exact.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::{AnnIndex, DistanceMetric};
use crate::error::{KnnError, Result};
use crate::vectors::{check_vector, Label};

#[derive(Debug)]
struct Slot {
    label: Label,
    vector: Vec<f32>,
    deleted: bool,
}

#[derive(Debug, Default)]
struct FlatState {
    slots: Vec<Slot>,
    labels: HashMap<Label, usize>,
    capacity: usize,
    deleted: usize,
}

#[derive(Debug)]
pub struct FlatIndex {
    dims: usize,
    metric: DistanceMetric,
    state: RwLock<FlatState>,
}

impl FlatIndex {
    pub fn new(dims: usize, capacity: usize, metric: DistanceMetric) -> Self {
        Self {
            dims,
            metric,
            state: RwLock::new(FlatState {
                slots: Vec::with_capacity(capacity),
                capacity,
                ..Default::default()
            }),
        }
    }
}

impl AnnIndex for FlatIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn capacity(&self) -> usize {
        self.state.read().capacity
    }

    fn insert(&self, label: Label, vector: &[f32]) -> Result<()> {
        check_vector(self.dims, vector)?;
        let mut state = self.state.write();

        if let Some(&slot_id) = state.labels.get(&label) {
            let was_deleted = std::mem::replace(&mut state.slots[slot_id].deleted, false);
            state.slots[slot_id].vector = vector.to_vec();
            if was_deleted {
                state.deleted -= 1;
            }
            return Ok(());
        }

        if state.slots.len() >= state.capacity {
            state.capacity = (state.capacity * 2).max(1);
        }
        let slot_id = state.slots.len();
        state.slots.push(Slot {
            label,
            vector: vector.to_vec(),
            deleted: false,
        });
        state.labels.insert(label, slot_id);
        Ok(())
    }

    fn soft_delete(&self, label: Label) -> bool {
        let mut state = self.state.write();
        let Some(&slot_id) = state.labels.get(&label) else {
            return false;
        };
        if std::mem::replace(&mut state.slots[slot_id].deleted, true) {
            return false;
        }
        state.deleted += 1;
        true
    }

    fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<(Label, f32)>> {
        if query.len() != self.dims {
            return Err(KnnError::dimension_mismatch(self.dims, query.len()));
        }

        let state = self.state.read();
        // Slot position is insertion order, and the sort is stable
        let mut scored: Vec<(Label, f32)> = state
            .slots
            .iter()
            .filter(|slot| !slot.deleted)
            .map(|slot| (slot.label, self.metric.distance(query, &slot.vector)))
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn contains(&self, label: Label) -> bool {
        let state = self.state.read();
        state
            .labels
            .get(&label)
            .is_some_and(|&id| !state.slots[id].deleted)
    }

    fn len(&self) -> usize {
        let state = self.state.read();
        state.slots.len() - state.deleted
    }

    fn deleted_count(&self) -> usize {
        self.state.read().deleted
    }

    fn index_type_name(&self) -> &'static str {
        "Flat"
    }
}
