//! Vector data model
//!
//! - `LabeledVector`: a vector addressed by its numeric label
//! - `ChangeRecord`: a timestamped upsert or tombstone, as stored by a
//!   collection and replayed by warm index instances
//! - `Change`: the wire form of a change inside a search request, stamped with
//!   the request's `updateTimestamp` before it reaches the engine

pub mod format;

use crate::error::{KnnError, Result};
use serde::{Deserialize, Serialize};

/// Numeric identifier addressing a vector inside a collection
pub type Label = u64;

/// Epoch milliseconds
pub type Timestamp = i64;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Reject vectors whose length disagrees with the collection, or that carry
/// NaN/infinite components
pub fn check_vector(expected_dims: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected_dims {
        return Err(KnnError::dimension_mismatch(expected_dims, vector.len()));
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(KnnError::invalid_input("vector components must be finite"));
    }
    Ok(())
}

/// A vector with its label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledVector {
    pub label: Label,
    pub vector: Vec<f32>,
}

impl LabeledVector {
    pub fn new(label: Label, vector: Vec<f32>) -> Self {
        Self { label, vector }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A timestamped change: either an upsert (vector present) or a tombstone
/// (`deactivated`, vector absent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub label: Label,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deactivated: bool,
}

/// Borrowed view of what a change does
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeKind<'a> {
    Upsert(&'a [f32]),
    Tombstone,
}

impl ChangeRecord {
    pub fn upsert(label: Label, vector: Vec<f32>, timestamp: Timestamp) -> Self {
        Self {
            label,
            vector: Some(vector),
            timestamp,
            deactivated: false,
        }
    }

    pub fn tombstone(label: Label, timestamp: Timestamp) -> Self {
        Self {
            label,
            vector: None,
            timestamp,
            deactivated: true,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.deactivated
    }

    /// Classify the change; a record that is neither deactivated nor carries
    /// a vector is malformed
    pub fn kind(&self) -> Result<ChangeKind<'_>> {
        match (&self.vector, self.deactivated) {
            (_, true) => Ok(ChangeKind::Tombstone),
            (Some(vector), false) => Ok(ChangeKind::Upsert(vector)),
            (None, false) => Err(KnnError::invalid_input(format!(
                "change for label {} has neither a vector nor deactivated: true",
                self.label
            ))),
        }
    }

    /// The live vector, if this record is an upsert
    pub fn into_labeled(self) -> Option<LabeledVector> {
        match (self.vector, self.deactivated) {
            (Some(vector), false) => Some(LabeledVector::new(self.label, vector)),
            _ => None,
        }
    }
}

/// A change as it arrives inside a request body (no timestamp of its own)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub label: Label,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated: Option<bool>,
}

impl Change {
    pub fn upsert(label: Label, vector: Vec<f32>) -> Self {
        Self {
            label,
            vector: Some(vector),
            deactivated: None,
        }
    }

    pub fn tombstone(label: Label) -> Self {
        Self {
            label,
            vector: None,
            deactivated: Some(true),
        }
    }

    /// Stamp with the batch timestamp
    pub fn into_record(self, timestamp: Timestamp) -> ChangeRecord {
        ChangeRecord {
            label: self.label,
            vector: self.vector,
            timestamp,
            deactivated: self.deactivated.unwrap_or(false),
        }
    }
}

impl From<ChangeRecord> for Change {
    fn from(record: ChangeRecord) -> Self {
        Self {
            label: record.label,
            vector: record.vector,
            deactivated: record.deactivated.then_some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_vector() {
        assert!(check_vector(3, &[1.0, 2.0, 3.0]).is_ok());

        let err = check_vector(3, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            KnnError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        let err = check_vector(2, &[1.0, f32::NAN]).unwrap_err();
        assert!(matches!(err, KnnError::InvalidInput(_)));
    }

    #[test]
    fn test_change_record_wire_format() {
        let tombstone = ChangeRecord::tombstone(7, 1000);
        let json = serde_json::to_value(&tombstone).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"label": 7, "timestamp": 1000, "deactivated": true})
        );

        let upsert = ChangeRecord::upsert(1, vec![1.0, 2.0], 5);
        let json = serde_json::to_value(&upsert).unwrap();
        assert!(json.get("deactivated").is_none());
    }

    #[test]
    fn test_change_kind() {
        let upsert = ChangeRecord::upsert(1, vec![0.5], 1);
        assert_eq!(upsert.kind().unwrap(), ChangeKind::Upsert(&[0.5]));
        assert_eq!(ChangeRecord::tombstone(1, 1).kind().unwrap(), ChangeKind::Tombstone);

        let malformed = ChangeRecord {
            label: 3,
            vector: None,
            timestamp: 1,
            deactivated: false,
        };
        assert!(malformed.kind().is_err());
    }

    #[test]
    fn test_change_into_record() {
        let change: Change =
            serde_json::from_value(serde_json::json!({"label": 4, "deactivated": true})).unwrap();
        let record = change.into_record(42);
        assert!(record.is_tombstone());
        assert_eq!(record.timestamp, 42);
        assert!(record.into_labeled().is_none());
    }
}
