//! Index configuration types
//!
//! Provides configuration structures for different index backends.

use crate::defaults::{DEFAULT_HNSW_EF_CONSTRUCTION, DEFAULT_HNSW_EF_SEARCH, DEFAULT_HNSW_M};
use crate::error::{KnnError, Result};

/// Configuration for ANN index backends
#[derive(Clone, Debug, PartialEq)]
pub enum AnnIndexConfig {
    /// HNSW (Hierarchical Navigable Small World) - in-memory graph
    Hnsw(HnswParams),
    /// Exhaustive scan; exact results, used for small collections and tests
    Flat,
}

impl Default for AnnIndexConfig {
    fn default() -> Self {
        AnnIndexConfig::Hnsw(HnswParams::default())
    }
}

impl AnnIndexConfig {
    /// Create HNSW config with default parameters
    pub fn hnsw() -> Self {
        AnnIndexConfig::Hnsw(HnswParams::default())
    }

    /// Create HNSW config with custom M parameter
    pub fn hnsw_with_m(m: usize) -> Self {
        AnnIndexConfig::Hnsw(HnswParams::with_m(m))
    }

    /// Get the index type name
    pub fn index_type_name(&self) -> &'static str {
        match self {
            AnnIndexConfig::Hnsw(_) => "HNSW",
            AnnIndexConfig::Flat => "Flat",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            AnnIndexConfig::Hnsw(params) => params.validate(),
            AnnIndexConfig::Flat => Ok(()),
        }
    }
}

/// HNSW index parameters
#[derive(Clone, Debug, PartialEq)]
pub struct HnswParams {
    /// Max connections per node (M parameter)
    pub m: usize,
    /// Max connections at layer 0 (usually 2*M)
    pub m_max0: usize,
    /// Search width during construction
    pub ef_construction: usize,
    /// Level multiplier (1/ln(M))
    pub ml: f64,
    /// Default search ef (raised to k when k is larger)
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(
            DEFAULT_HNSW_M,
            DEFAULT_HNSW_EF_CONSTRUCTION,
            DEFAULT_HNSW_EF_SEARCH,
        )
    }
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            m,
            m_max0: m * 2,
            ef_construction,
            ml: 1.0 / (m.max(2) as f64).ln(),
            ef_search,
        }
    }

    /// Create with custom M parameter
    pub fn with_m(m: usize) -> Self {
        Self::new(m, DEFAULT_HNSW_EF_CONSTRUCTION, DEFAULT_HNSW_EF_SEARCH)
    }

    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(KnnError::config("HNSW M must be at least 2"));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(KnnError::config("HNSW ef values must be positive"));
        }
        Ok(())
    }
}
