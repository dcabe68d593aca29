//! Snapshot object format for static collections
//!
//! Binary layout (all little-endian):
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (32 bytes)                                            │
//! │   magic: u32      = 0x534E4E4B ("KNNS")                      │
//! │   version: u32    = 1                                        │
//! │   dims: u32       = vector dimensions                        │
//! │   count: u64      = number of records                        │
//! │   crc32: u32      = CRC32 of everything after the header     │
//! │   _reserved: [u8; 8]                                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Record 0: label u64, [f32; dims]                             │
//! │ Record 1: label u64, [f32; dims]                             │
//! │ ...                                                          │
//! └──────────────────────────────────────────────────────────────┘

use super::LabeledVector;
use crate::defaults::{SNAPSHOT_HEADER_SIZE, SNAPSHOT_MAGIC};
use crate::storage::StorageError;
use bytes::{Bytes, BytesMut};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    pub dims: u32,
    pub count: u64,
    pub crc32: u32,
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, StorageError> {
    bytes
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| StorageError::Serialization(format!("truncated u32 at offset {}", at)))
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, StorageError> {
    bytes
        .get(at..at + 8)
        .and_then(|s| s.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| StorageError::Serialization(format!("truncated u64 at offset {}", at)))
}

impl SnapshotHeader {
    pub fn to_bytes(&self) -> [u8; SNAPSHOT_HEADER_SIZE] {
        let mut bytes = [0u8; SNAPSHOT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.dims.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.count.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.crc32.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < SNAPSHOT_HEADER_SIZE {
            return Err(StorageError::Serialization("snapshot header too short".into()));
        }

        let header = Self {
            magic: read_u32(bytes, 0)?,
            version: read_u32(bytes, 4)?,
            dims: read_u32(bytes, 8)?,
            count: read_u64(bytes, 12)?,
            crc32: read_u32(bytes, 20)?,
        };

        if header.magic != SNAPSHOT_MAGIC {
            return Err(StorageError::Serialization("invalid snapshot magic".into()));
        }
        if header.version != SNAPSHOT_VERSION {
            return Err(StorageError::Serialization(format!(
                "unsupported snapshot version {}",
                header.version
            )));
        }

        Ok(header)
    }

    fn record_size(&self) -> usize {
        8 + self.dims as usize * 4
    }
}

/// Encode a full snapshot
pub fn encode_snapshot(dims: usize, vectors: &[LabeledVector]) -> Bytes {
    let record_size = 8 + dims * 4;
    let mut payload = BytesMut::with_capacity(vectors.len() * record_size);

    for item in vectors {
        payload.extend_from_slice(&item.label.to_le_bytes());
        for value in &item.vector {
            payload.extend_from_slice(&value.to_le_bytes());
        }
    }

    let header = SnapshotHeader {
        magic: SNAPSHOT_MAGIC,
        version: SNAPSHOT_VERSION,
        dims: dims as u32,
        count: vectors.len() as u64,
        crc32: crc32fast::hash(&payload),
    };

    let mut out = BytesMut::with_capacity(SNAPSHOT_HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload);
    out.freeze()
}

/// Validated snapshot whose records are decoded on demand
#[derive(Debug, Clone)]
pub struct Snapshot {
    header: SnapshotHeader,
    data: Bytes,
}

impl Snapshot {
    /// Parse and verify a snapshot object
    pub fn decode(data: Bytes) -> Result<Self, StorageError> {
        let header = SnapshotHeader::from_bytes(&data)?;

        let expected_len = SNAPSHOT_HEADER_SIZE + header.count as usize * header.record_size();
        if data.len() != expected_len {
            return Err(StorageError::Serialization(format!(
                "snapshot length {} does not match header (expected {})",
                data.len(),
                expected_len
            )));
        }

        if crc32fast::hash(&data[SNAPSHOT_HEADER_SIZE..]) != header.crc32 {
            return Err(StorageError::ChecksumMismatch);
        }

        Ok(Self { header, data })
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    pub fn dims(&self) -> usize {
        self.header.dims as usize
    }

    pub fn len(&self) -> usize {
        self.header.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    /// Lazily decode records in stored order. The iterator owns a cheap
    /// clone of the buffer, so each call starts a fresh pass.
    pub fn records(&self) -> SnapshotRecords {
        SnapshotRecords {
            data: self.data.slice(SNAPSHOT_HEADER_SIZE..),
            dims: self.dims(),
            offset: 0,
        }
    }
}

/// Owning iterator over snapshot records
#[derive(Debug, Clone)]
pub struct SnapshotRecords {
    data: Bytes,
    dims: usize,
    offset: usize,
}

impl Iterator for SnapshotRecords {
    type Item = LabeledVector;

    fn next(&mut self) -> Option<Self::Item> {
        let record_size = 8 + self.dims * 4;
        let chunk = self.data.get(self.offset..self.offset + record_size)?;
        self.offset += record_size;

        let (label, values) = chunk.split_at(8);
        let mut label_bytes = [0u8; 8];
        label_bytes.copy_from_slice(label);

        let vector = values
            .chunks_exact(4)
            .map(|v| f32::from_le_bytes([v[0], v[1], v[2], v[3]]))
            .collect();

        Some(LabeledVector::new(u64::from_le_bytes(label_bytes), vector))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let record_size = 8 + self.dims * 4;
        let remaining = (self.data.len() - self.offset) / record_size;
        (remaining, Some(remaining))
    }
}
