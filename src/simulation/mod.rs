//! Simulation framework
//!
//! Deploys a database onto the in-process compute pool, loads random vectors,
//! stalls some instances and drives search invocations through the
//! multi-region invoker. Reports latency percentiles and how often the invoker
//! had to fall back or rescan.

use crate::collection::open_collection;
use crate::config::{CollectionConfig, DatabaseConfig, EngineConfig, SuperLambdaConfig};
use crate::deployer::Orchestrator;
use crate::handler::{Envelope, KnnRequest};
use crate::invoker::LocalComputePool;
use crate::storage::mock::{create_temp_storage, MockStorageConfig};
use crate::storage::StorageBackend;
use crate::vectors::LabeledVector;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Storage type for simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Mock storage (in-memory tables, temp-dir objects)
    Mock,
    /// DynamoDB + S3 (requires AWS credentials)
    #[cfg(feature = "aws")]
    Aws,
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(StorageType::Mock),
            #[cfg(feature = "aws")]
            "aws" => Ok(StorageType::Aws),
            _ => Err(format!("Unknown storage type: {}", s)),
        }
    }
}

/// Configuration for simulation
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of vectors loaded into the collection
    pub vector_count: usize,
    /// Vector dimensions
    pub dimensions: usize,
    /// Batch size for collection writes
    pub batch_size: usize,
    /// Number of search invocations
    pub search_queries: usize,
    /// Top-k results to retrieve
    pub k: usize,
    /// Secondary regions deployed besides the main one
    pub secondary_regions: Vec<String>,
    /// Main-region instances that stall on every call
    pub stalled_instances: usize,
    /// How long a stalled instance sleeps before answering
    pub stall: Duration,
    pub super_lambda: SuperLambdaConfig,
    pub storage_type: StorageType,
    /// AWS region (only used for AWS storage)
    pub aws_region: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            vector_count: 10_000,
            dimensions: 128,
            batch_size: 500,
            search_queries: 200,
            k: 10,
            secondary_regions: vec!["eu-west-1".to_string()],
            stalled_instances: 1,
            stall: Duration::from_secs(2),
            super_lambda: SuperLambdaConfig::default(),
            storage_type: StorageType::Mock,
            aws_region: "us-east-1".to_string(),
        }
    }
}

/// Results from a simulation run
#[derive(Debug, Clone)]
pub struct SimulationResults {
    /// Vectors loaded into the collection
    pub vectors_loaded: usize,
    /// Instances deployed
    pub instances: usize,
    /// Invocations that returned a response
    pub served: usize,
    /// Invocations that exhausted the retry budget
    pub failed: usize,
    /// Candidates abandoned across all invocations
    pub total_fallbacks: u64,
    /// Liveness rescans across all invocations
    pub total_retries: u64,
    /// Latency of the first (cold) invocation
    pub cold_latency: Duration,
    pub latency_avg: Duration,
    pub latency_p50: Duration,
    pub latency_p99: Duration,
    /// Served invocations per answering instance id
    pub served_by: BTreeMap<String, usize>,
    pub total_duration: Duration,
}

impl SimulationResults {
    /// Print results in a formatted way
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    SIMULATION RESULTS                        ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Vectors Loaded:       {:>10}                             ║", self.vectors_loaded);
        println!("║ Instances:            {:>10}                             ║", self.instances);
        println!("║ Total Duration:       {:>10.2?}                         ║", self.total_duration);
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║                      INVOCATIONS                             ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Served:               {:>10}                             ║", self.served);
        println!("║ Failed:               {:>10}                             ║", self.failed);
        println!("║ Fallbacks:            {:>10}                             ║", self.total_fallbacks);
        println!("║ Retries:              {:>10}                             ║", self.total_retries);
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║                      LATENCY                                 ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Cold Start:           {:>10.2?}                         ║", self.cold_latency);
        println!("║ Avg Latency:          {:>10.2?}                         ║", self.latency_avg);
        println!("║ P50 Latency:          {:>10.2?}                         ║", self.latency_p50);
        println!("║ P99 Latency:          {:>10.2?}                         ║", self.latency_p99);
        println!("╠══════════════════════════════════════════════════════════════╣");
        for (instance, count) in &self.served_by {
            println!("║ {:<36} {:>10}              ║", instance, count);
        }
        println!("╚══════════════════════════════════════════════════════════════╝");
    }
}

/// Simulation runner
pub struct SimulationRunner {
    config: SimulationConfig,
}

impl SimulationRunner {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run the simulation; the deployment is destroyed afterwards even when
    /// the invocation phase fails
    pub async fn run(&self) -> anyhow::Result<SimulationResults> {
        let start_time = Instant::now();
        info!(config = ?self.config, "Starting simulation");

        let backend = self.create_storage().await?;
        let database = DatabaseConfig::new("sim", &self.config.aws_region)
            .with_secondary_regions(self.config.secondary_regions.clone());
        let collection = CollectionConfig::dynamic("vectors", self.config.dimensions);

        let pool = Arc::new(LocalComputePool::new(EngineConfig::default()).with_backend(backend.clone()));
        let orchestrator = Orchestrator::new(
            database.clone(),
            collection.clone(),
            self.config.super_lambda.clone(),
            backend.clone(),
            pool.clone(),
        )?;

        let deployed = orchestrator.deploy().await?;
        let outcome = self
            .exercise(&orchestrator, &pool, &database, &collection, &backend)
            .await;
        orchestrator.destroy().await?;

        let (vectors_loaded, samples) = outcome?;
        Ok(self.calculate_results(vectors_loaded, deployed.len(), samples, start_time.elapsed()))
    }

    async fn create_storage(&self) -> anyhow::Result<StorageBackend> {
        match self.config.storage_type {
            StorageType::Mock => {
                info!("Using mock storage");
                Ok(create_temp_storage(MockStorageConfig::fast())?)
            }
            #[cfg(feature = "aws")]
            StorageType::Aws => {
                info!(region = %self.config.aws_region, "Using AWS storage");
                crate::storage::aws::create_aws_storage(&self.config.aws_region, "serverless-knn-sim", "sim")
                    .await
            }
        }
    }

    async fn exercise(
        &self,
        orchestrator: &Orchestrator,
        pool: &Arc<LocalComputePool>,
        database: &DatabaseConfig,
        collection: &CollectionConfig,
        backend: &StorageBackend,
    ) -> anyhow::Result<(usize, Vec<Sample>)> {
        let vectors_loaded = self.load_vectors(database, collection, backend).await?;

        for instance in orchestrator
            .plan()
            .iter()
            .filter(|i| i.region == database.main_region)
            .take(self.config.stalled_instances)
        {
            info!(instance = %instance, stall = ?self.config.stall, "Stalling instance");
            pool.stall(&instance.name, self.config.stall);
        }

        let super_lambda = orchestrator.super_lambda(pool.clone());
        let mut samples = Vec::with_capacity(self.config.search_queries);

        for i in 0..self.config.search_queries {
            let request = KnnRequest::new(generate_random_vector(self.config.dimensions), self.config.k);

            let start = Instant::now();
            let sample = match super_lambda.invoke(Envelope::knn(&request)).await {
                Ok(outcome) => Sample {
                    latency: start.elapsed(),
                    served_by: Some(outcome.instance.name),
                    fallbacks: outcome.fallbacks,
                    retries: outcome.retries,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Invocation failed");
                    Sample {
                        latency: start.elapsed(),
                        served_by: None,
                        fallbacks: 0,
                        retries: self.config.super_lambda.max_retries,
                    }
                }
            };
            samples.push(sample);

            if (i + 1) % 50 == 0 {
                info!(
                    progress = format!("{}/{}", i + 1, self.config.search_queries),
                    "Search progress"
                );
            }
        }

        Ok((vectors_loaded, samples))
    }

    async fn load_vectors(
        &self,
        database: &DatabaseConfig,
        collection: &CollectionConfig,
        backend: &StorageBackend,
    ) -> anyhow::Result<usize> {
        let target = open_collection(&database.database_name, collection, Some(backend))?;
        let batch_size = self.config.batch_size.max(1);

        let mut loaded = 0;
        while loaded < self.config.vector_count {
            let end = (loaded + batch_size).min(self.config.vector_count);
            let batch: Vec<LabeledVector> = (loaded..end)
                .map(|label| LabeledVector::new(label as u64, generate_random_vector(self.config.dimensions)))
                .collect();
            target.add(batch).await?;
            loaded = end;
        }

        info!(vectors = loaded, "Collection loaded");
        Ok(loaded)
    }

    fn calculate_results(
        &self,
        vectors_loaded: usize,
        instances: usize,
        samples: Vec<Sample>,
        total_duration: Duration,
    ) -> SimulationResults {
        let cold_latency = samples.first().map_or(Duration::ZERO, |s| s.latency);

        let mut served_by = BTreeMap::new();
        let mut latencies = Vec::new();
        let mut failed = 0;
        for sample in &samples {
            match &sample.served_by {
                Some(name) => {
                    *served_by.entry(name.clone()).or_insert(0) += 1;
                    latencies.push(sample.latency);
                }
                None => failed += 1,
            }
        }
        latencies.sort();

        let latency_avg = if latencies.is_empty() {
            Duration::ZERO
        } else {
            latencies.iter().sum::<Duration>() / latencies.len() as u32
        };

        SimulationResults {
            vectors_loaded,
            instances,
            served: latencies.len(),
            failed,
            total_fallbacks: samples.iter().map(|s| s.fallbacks as u64).sum(),
            total_retries: samples.iter().map(|s| s.retries as u64).sum(),
            cold_latency,
            latency_avg,
            latency_p50: percentile(&latencies, 0.50),
            latency_p99: percentile(&latencies, 0.99),
            served_by,
            total_duration,
        }
    }
}

struct Sample {
    latency: Duration,
    served_by: Option<String>,
    fallbacks: u32,
    retries: u32,
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Generate a random normalized vector
fn generate_random_vector(dims: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let v: Vec<f32> = (0..dims).map(|_| rng.gen::<f32>()).collect();
    normalize(&v)
}

/// Normalize a vector
fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile() {
        let sorted: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        assert_eq!(percentile(&sorted, 0.50), Duration::from_millis(51));
        assert_eq!(percentile(&sorted, 0.99), Duration::from_millis(100));
        assert_eq!(percentile(&[], 0.99), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_small_simulation() {
        let config = SimulationConfig {
            vector_count: 50,
            dimensions: 4,
            batch_size: 20,
            search_queries: 5,
            k: 3,
            secondary_regions: vec!["eu-west-1".to_string()],
            stalled_instances: 1,
            stall: Duration::from_millis(300),
            super_lambda: SuperLambdaConfig {
                max_timeout: Duration::from_millis(100),
                ..SuperLambdaConfig::default()
            },
            ..SimulationConfig::default()
        };

        let results = SimulationRunner::new(config).run().await.unwrap();
        assert_eq!(results.vectors_loaded, 50);
        // m0, m1 and eu-west-1
        assert_eq!(results.instances, 3);
        assert_eq!(results.served, 5);
        assert_eq!(results.failed, 0);
        assert!(!results.served_by.contains_key("sim-vectors-m0"));
        assert!(results.total_fallbacks >= 5);
    }
}
