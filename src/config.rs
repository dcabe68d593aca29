//! Configuration module
//!
//! Two kinds of configuration live here:
//! - descriptors handed to the core by the metadata store (`DatabaseConfig`,
//!   `CollectionConfig`), serialized camelCase
//! - process configuration for an instance or orchestrator (`Config`), loaded
//!   from environment variables

use crate::defaults::*;
use crate::error::{KnnError, Result};
use crate::index::{AnnIndexConfig, DistanceMetric, HnswParams};
use crate::storage::{mock, StorageBackend};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Descriptors
// ============================================================================

/// Whether a collection accepts writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    /// Mutable, backed by a key-value table (or memory)
    Dynamic,
    /// Immutable snapshot in object storage
    Static,
}

impl CollectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Dynamic => "dynamic",
            CollectionType::Static => "static",
        }
    }
}

impl FromStr for CollectionType {
    type Err = KnnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dynamic" => Ok(CollectionType::Dynamic),
            "static" => Ok(CollectionType::Static),
            other => Err(KnnError::config(format!("Unknown collection type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    pub collection_name: String,
    pub dimensions: usize,
    #[serde(rename = "type")]
    pub kind: CollectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

impl CollectionConfig {
    pub fn dynamic(name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            collection_name: name.into(),
            dimensions,
            kind: CollectionType::Dynamic,
            size: None,
        }
    }

    pub fn fixed(name: impl Into<String>, dimensions: usize, size: usize) -> Self {
        Self {
            collection_name: name.into(),
            dimensions,
            kind: CollectionType::Static,
            size: Some(size),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection_name.trim().is_empty() {
            return Err(KnnError::config("collectionName must not be empty"));
        }
        if self.dimensions == 0 {
            return Err(KnnError::config("dimensions must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub database_name: String,
    pub main_region: String,
    #[serde(default)]
    pub secondary_regions: Vec<String>,
    #[serde(default = "default_awake_instances")]
    pub awake_instances: usize,
}

fn default_awake_instances() -> usize {
    DEFAULT_AWAKE_INSTANCES
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>, main_region: impl Into<String>) -> Self {
        Self {
            database_name: name.into(),
            main_region: main_region.into(),
            secondary_regions: Vec::new(),
            awake_instances: DEFAULT_AWAKE_INSTANCES,
        }
    }

    pub fn with_secondary_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secondary_regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_name.trim().is_empty() {
            return Err(KnnError::config("databaseName must not be empty"));
        }
        if self.main_region.trim().is_empty() {
            return Err(KnnError::config("mainRegion must not be empty"));
        }
        for (i, region) in self.secondary_regions.iter().enumerate() {
            if region == &self.main_region {
                return Err(KnnError::config(format!(
                    "secondary region {} duplicates the main region",
                    region
                )));
            }
            if self.secondary_regions[..i].contains(region) {
                return Err(KnnError::config(format!(
                    "secondary region {} listed twice",
                    region
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Process configuration
// ============================================================================

/// Main configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier reported back in every response
    pub instance_id: String,
    pub database: DatabaseConfig,
    pub collection: CollectionConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub super_lambda: SuperLambdaConfig,
    pub api: ApiConfig,
}

/// Parse an optional variable; a value that is set but malformed is an error
fn env_parse_opt<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_setting(key, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(env_parse_opt(key)?.unwrap_or(default))
}

fn parse_setting<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, raw, e))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load config from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DatabaseConfig {
            database_name: env_string("DATABASE_NAME", "default"),
            main_region: env_string("MAIN_REGION", DEFAULT_MAIN_REGION),
            secondary_regions: std::env::var("SECONDARY_REGIONS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|r| !r.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            awake_instances: env_parse("AWAKE_INSTANCES", DEFAULT_AWAKE_INSTANCES)?,
        };
        database.validate()?;

        let collection = CollectionConfig {
            collection_name: env_string("COLLECTION_NAME", "vectors"),
            dimensions: env_parse("DIMENSIONS", DEFAULT_DIMENSIONS)?,
            kind: env_string("COLLECTION_TYPE", "dynamic").parse()?,
            size: env_parse_opt("COLLECTION_SIZE")?,
        };
        collection.validate()?;

        let storage_mode = env_string("STORAGE_MODE", "mock");
        let storage = match storage_mode.as_str() {
            "memory" => StorageConfig::Memory,
            "mock" => StorageConfig::Mock {
                root: std::env::var("MOCK_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp/serverless-knn")),
                simulate_latency: std::env::var("SIMULATE_LATENCY")
                    .map(|v| v == "true")
                    .unwrap_or(false),
            },
            #[cfg(feature = "aws")]
            "aws" => StorageConfig::Aws {
                region: std::env::var("STORAGE_REGION")
                    .or_else(|_| std::env::var("AWS_REGION"))
                    .unwrap_or_else(|_| database.main_region.clone()),
                s3_bucket: env_string("S3_BUCKET", "serverless-knn"),
                s3_prefix: database.database_name.clone(),
            },
            _ => anyhow::bail!("Unknown storage mode: {}", storage_mode),
        };

        let metric = env_string("DISTANCE_METRIC", "l2");
        let index_type = env_string("INDEX_TYPE", "hnsw").to_lowercase();
        if !matches!(index_type.as_str(), "hnsw" | "flat") {
            anyhow::bail!("Unknown index type: {}", index_type);
        }
        let engine = EngineConfig {
            hnsw_m: env_parse("HNSW_M", DEFAULT_HNSW_M)?,
            hnsw_ef_construction: env_parse("HNSW_EF_CONSTRUCTION", DEFAULT_HNSW_EF_CONSTRUCTION)?,
            hnsw_ef_search: env_parse("HNSW_EF_SEARCH", DEFAULT_HNSW_EF_SEARCH)?,
            metric: metric.parse().map_err(anyhow::Error::msg)?,
            index_type,
            capacity_floor: env_parse("CAPACITY_FLOOR", DEFAULT_CAPACITY_FLOOR)?,
        };
        engine.create_index_config().validate()?;

        let super_lambda = SuperLambdaConfig {
            max_timeout: Duration::from_millis(env_parse("MAX_TIMEOUT_MS", DEFAULT_MAX_TIMEOUT_MS)?),
            max_retries: env_parse("MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_backoff: Duration::from_millis(env_parse(
                "RETRY_BACKOFF_MS",
                DEFAULT_RETRY_BACKOFF_MS,
            )?),
            main_region_fallbacks: env_parse(
                "MAIN_REGION_FALLBACKS",
                DEFAULT_MAIN_REGION_FALLBACKS,
            )?,
        };

        let api = ApiConfig {
            host: env_string("API_HOST", DEFAULT_HOST),
            port: env_parse("API_PORT", DEFAULT_PORT)?,
        };

        Ok(Self {
            instance_id: std::env::var("INSTANCE_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            database,
            collection,
            storage,
            engine,
            super_lambda,
            api,
        })
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Process-local collection; dynamic collections only
    Memory,
    Mock {
        root: PathBuf,
        simulate_latency: bool,
    },
    #[cfg(feature = "aws")]
    Aws {
        region: String,
        s3_bucket: String,
        s3_prefix: String,
    },
}

impl StorageConfig {
    /// Create storage backend from config; `None` for in-memory mode
    pub async fn create_backend(&self) -> anyhow::Result<Option<StorageBackend>> {
        match self {
            StorageConfig::Memory => Ok(None),
            StorageConfig::Mock {
                root,
                simulate_latency,
            } => {
                let config = if *simulate_latency {
                    mock::MockStorageConfig::realistic()
                } else {
                    mock::MockStorageConfig::fast()
                };

                Ok(Some(mock::create_mock_storage(root, config)?))
            }
            #[cfg(feature = "aws")]
            StorageConfig::Aws {
                region,
                s3_bucket,
                s3_prefix,
            } => {
                use crate::storage::aws;
                Ok(Some(aws::create_aws_storage(region, s3_bucket, s3_prefix).await?))
            }
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    pub metric: DistanceMetric,
    /// Index type selection (hnsw or flat)
    pub index_type: String,
    /// Minimum capacity for dynamic collections
    pub capacity_floor: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hnsw_m: DEFAULT_HNSW_M,
            hnsw_ef_construction: DEFAULT_HNSW_EF_CONSTRUCTION,
            hnsw_ef_search: DEFAULT_HNSW_EF_SEARCH,
            metric: DistanceMetric::L2,
            index_type: "hnsw".to_string(),
            capacity_floor: DEFAULT_CAPACITY_FLOOR,
        }
    }
}

impl EngineConfig {
    /// Create AnnIndexConfig from engine config
    pub fn create_index_config(&self) -> AnnIndexConfig {
        match self.index_type.as_str() {
            "flat" => AnnIndexConfig::Flat,
            _ => AnnIndexConfig::Hnsw(HnswParams::new(
                self.hnsw_m,
                self.hnsw_ef_construction,
                self.hnsw_ef_search,
            )),
        }
    }
}

/// Multi-region invoker and deployment configuration
#[derive(Debug, Clone)]
pub struct SuperLambdaConfig {
    /// Per-candidate race timeout
    pub max_timeout: Duration,
    /// Full rescans allowed after the first pass
    pub max_retries: u32,
    /// Pause before each rescan
    pub retry_backoff: Duration,
    /// Extra main-region replicas on top of the primary
    pub main_region_fallbacks: usize,
}

impl Default for SuperLambdaConfig {
    fn default() -> Self {
        Self {
            max_timeout: Duration::from_millis(DEFAULT_MAX_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            main_region_fallbacks: DEFAULT_MAIN_REGION_FALLBACKS,
        }
    }
}

/// API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_config_wire_format() {
        let json = serde_json::json!({
            "collectionName": "products",
            "dimensions": 3,
            "type": "static",
            "size": 1000
        });
        let config: CollectionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.kind, CollectionType::Static);
        assert_eq!(config.size, Some(1000));
        assert!(config.validate().is_ok());

        let config: CollectionConfig = serde_json::from_value(serde_json::json!({
            "collectionName": "live",
            "dimensions": 8,
            "type": "dynamic"
        }))
        .unwrap();
        assert_eq!(config.size, None);
    }

    #[test]
    fn test_collection_config_rejects_unknown_type() {
        let json = serde_json::json!({
            "collectionName": "x",
            "dimensions": 3,
            "type": "frozen"
        });
        assert!(serde_json::from_value::<CollectionConfig>(json).is_err());
        assert!("frozen".parse::<CollectionType>().is_err());
    }

    #[test]
    fn test_collection_config_validation() {
        assert!(CollectionConfig::dynamic("", 3).validate().is_err());
        assert!(CollectionConfig::dynamic("c", 0).validate().is_err());
    }

    #[test]
    fn test_database_config_defaults() {
        let config: DatabaseConfig = serde_json::from_value(serde_json::json!({
            "databaseName": "db",
            "mainRegion": "us-east-1"
        }))
        .unwrap();
        assert!(config.secondary_regions.is_empty());
        assert_eq!(config.awake_instances, DEFAULT_AWAKE_INSTANCES);
    }

    #[test]
    fn test_database_config_validation() {
        let config = DatabaseConfig::new("db", "us-east-1").with_secondary_regions(["eu-west-1"]);
        assert!(config.validate().is_ok());

        let dup = DatabaseConfig::new("db", "us-east-1").with_secondary_regions(["us-east-1"]);
        assert!(dup.validate().is_err());

        let twice = DatabaseConfig::new("db", "us-east-1")
            .with_secondary_regions(["eu-west-1", "eu-west-1"]);
        assert!(twice.validate().is_err());
    }

    #[test]
    fn test_malformed_number_fails_loading() {
        let err = parse_setting::<usize>("DIMENSIONS", "abc").unwrap_err();
        assert!(err.to_string().contains("DIMENSIONS"));
        assert_eq!(parse_setting::<u16>("API_PORT", " 8080 ").unwrap(), 8080);
        assert!(parse_setting::<u16>("API_PORT", "70000").is_err());

        // Unique names so parallel tests never share them
        std::env::set_var("SERVERLESS_KNN_TEST_BAD_NUMBER", "12x");
        assert!(env_parse::<u64>("SERVERLESS_KNN_TEST_BAD_NUMBER", 5).is_err());
        std::env::remove_var("SERVERLESS_KNN_TEST_BAD_NUMBER");
        assert_eq!(env_parse::<u64>("SERVERLESS_KNN_TEST_UNSET_NUMBER", 5).unwrap(), 5);
        assert_eq!(
            env_parse_opt::<usize>("SERVERLESS_KNN_TEST_UNSET_NUMBER").unwrap(),
            None
        );
    }

    #[test]
    fn test_engine_index_config() {
        let engine = EngineConfig::default();
        assert_eq!(engine.create_index_config().index_type_name(), "HNSW");

        let flat = EngineConfig {
            index_type: "flat".into(),
            ..Default::default()
        };
        assert_eq!(flat.create_index_config(), AnnIndexConfig::Flat);
    }
}
