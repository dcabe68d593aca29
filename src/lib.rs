//! # Serverless KNN
//!
//! Approximate nearest neighbor search over a collection of labeled vectors,
//! served by stateless compute instances that lazily build an in-memory index
//! and are reached through a multi-region invoker.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!     │
//!     ▼
//! SuperLambda (liveness scan, timeout race, fallback, retry)
//!     │
//!     ▼
//! Instance: HTTP API (Axum) or in-process pool
//!     │
//!     ▼
//! RequestHandler (/knn, /wait)
//!     │
//!     ▼
//! KnnEngine (lazy bootstrap, warm updates)
//!     ├── AnnIndex (HNSW or flat)
//!     └── Collection (memory, table, snapshot)
//! ```
//!
//! The `deployer` module creates the durable resources, the liveness table and
//! every planned instance of a database, and tears them down again.
//!
//! ## Quick Start
//!
//! ```ignore
//! use serverless_knn::collection::MemoryCollection;
//! use serverless_knn::{EngineConfig, KnnEngine};
//!
//! let collection = Arc::new(MemoryCollection::new("db-vectors", 3));
//! let engine = KnnEngine::new(collection, EngineConfig::default());
//! let result = engine.search(&[1.0, 2.0, 3.0], 10).await?;
//! ```

pub mod defaults;
pub mod error;
pub mod storage;
pub mod vectors;
pub mod hnsw;
pub mod index;
pub mod collection;
pub mod engine;
pub mod handler;
pub mod api;
pub mod liveness;
pub mod invoker;
pub mod deployer;
pub mod usage;
pub mod config;
pub mod simulation;

pub use config::{CollectionConfig, CollectionType, Config, DatabaseConfig, EngineConfig, SuperLambdaConfig};
pub use defaults::*;
pub use engine::{KnnEngine, SearchResult};
pub use error::{KnnError, Result};
pub use invoker::SuperLambda;
pub use vectors::{Change, ChangeRecord, Label, LabeledVector, Timestamp};
