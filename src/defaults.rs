//! Centralized default values and constants
//!
//! This module consolidates all magic numbers and default values used throughout
//! the codebase, making them easy to find, modify, and document.

// ============================================================================
// Collections
// ============================================================================

/// Dimensionality assumed when none is configured
pub const DEFAULT_DIMENSIONS: usize = 384;

// ============================================================================
// Index Sizing
// ============================================================================

/// Minimum capacity allocated for a dynamic collection's index
pub const DEFAULT_CAPACITY_FLOOR: usize = 10_000;

/// Headroom multiplier applied to a dynamic collection's size at bootstrap
pub const DYNAMIC_CAPACITY_MULTIPLIER: usize = 2;

// ============================================================================
// HNSW Index Parameters
// ============================================================================

/// Default number of bidirectional links per node (M parameter)
/// Higher values improve recall but increase memory and build time
pub const DEFAULT_HNSW_M: usize = 16;

/// Default ef value during construction
pub const DEFAULT_HNSW_EF_CONSTRUCTION: usize = 200;

/// Default ef value during search
pub const DEFAULT_HNSW_EF_SEARCH: usize = 100;

// ============================================================================
// Search
// ============================================================================

/// Number of neighbors returned when a request omits `k`
pub const DEFAULT_TOP_K: usize = 1;

// ============================================================================
// Multi-Region Invoker
// ============================================================================

/// Per-candidate race timeout in milliseconds
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 500;

/// Number of full rescans of the liveness table before giving up
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Fixed pause between rescans in milliseconds
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;

/// Extra main-region replicas deployed on top of the primary one
pub const DEFAULT_MAIN_REGION_FALLBACKS: usize = 1;

/// Instances pre-warmed by `wake` when the database config does not say
pub const DEFAULT_AWAKE_INSTANCES: usize = 1;

/// Probe duration used by `wake` (milliseconds)
pub const DEFAULT_WAKE_PROBE_MS: u64 = 100;

/// Interval between health polls while an instance activates
pub const DEFAULT_ACTIVATION_POLL_MS: u64 = 100;

/// Upper bound on activation polling before deploy fails
pub const DEFAULT_ACTIVATION_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// Snapshot Format
// ============================================================================

/// Snapshot object magic number ("KNNS" in little-endian)
pub const SNAPSHOT_MAGIC: u32 = 0x534E_4E4B;

/// Snapshot header size in bytes
pub const SNAPSHOT_HEADER_SIZE: usize = 32;

// ============================================================================
// Server Configuration
// ============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port
pub const DEFAULT_PORT: u16 = 8080;

/// Default AWS region for the main deployment
pub const DEFAULT_MAIN_REGION: &str = "us-east-1";
