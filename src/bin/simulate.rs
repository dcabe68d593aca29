//! Failover simulation CLI
//!
//! Deploys a database onto the in-process compute pool, stalls some main-region
//! instances and measures what the multi-region invoker does about it.
//!
//! Usage:
//!   cargo run --bin simulate -- --vectors 10000 --stalled 1
//!   cargo run --bin simulate --features aws -- --storage aws

use clap::Parser;
use serverless_knn::simulation::{SimulationConfig, SimulationRunner, StorageType};
use serverless_knn::SuperLambdaConfig;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "knn-simulate")]
#[command(about = "Simulate multi-region invocation with stalled instances")]
#[command(version)]
struct Args {
    /// Number of vectors loaded into the collection
    #[arg(long, default_value = "10000")]
    vectors: usize,

    /// Vector dimensions
    #[arg(long, default_value = "128")]
    dimensions: usize,

    /// Batch size for collection writes
    #[arg(long, default_value = "500")]
    batch_size: usize,

    /// Number of search invocations
    #[arg(long, default_value = "200")]
    search_queries: usize,

    /// Top-k results to retrieve
    #[arg(long, default_value = "10")]
    k: usize,

    /// Comma-separated secondary regions
    #[arg(long, default_value = "eu-west-1", value_delimiter = ',')]
    secondary_regions: Vec<String>,

    /// Extra main-region instances
    #[arg(long, default_value = "1")]
    fallbacks: usize,

    /// Main-region instances that stall on every call
    #[arg(long, default_value = "1")]
    stalled: usize,

    /// Stall duration in milliseconds
    #[arg(long, default_value = "2000")]
    stall_ms: u64,

    /// Per-candidate timeout in milliseconds
    #[arg(long, default_value = "500")]
    max_timeout_ms: u64,

    /// Liveness rescans before giving up
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Storage backend: mock, aws
    #[arg(long, default_value = "mock")]
    storage: String,

    /// Main region
    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| format!("serverless_knn={},simulate={}", log_level, log_level)),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let storage_type: StorageType = match args.storage.parse() {
        Ok(st) => st,
        Err(e) => {
            eprintln!("Error: {}", e);
            #[cfg(not(feature = "aws"))]
            eprintln!("Note: AWS storage requires the 'aws' feature. Use: cargo run --bin simulate --features aws");
            std::process::exit(1);
        }
    };

    let config = SimulationConfig {
        vector_count: args.vectors,
        dimensions: args.dimensions,
        batch_size: args.batch_size,
        search_queries: args.search_queries,
        k: args.k,
        secondary_regions: args.secondary_regions,
        stalled_instances: args.stalled,
        stall: Duration::from_millis(args.stall_ms),
        super_lambda: SuperLambdaConfig {
            max_timeout: Duration::from_millis(args.max_timeout_ms),
            max_retries: args.max_retries,
            main_region_fallbacks: args.fallbacks,
            ..SuperLambdaConfig::default()
        },
        storage_type,
        aws_region: args.region,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                SERVERLESS KNN FAILOVER SIMULATION            ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║ Vectors:              {:>10}                             ║", config.vector_count);
    println!("║ Dimensions:           {:>10}                             ║", config.dimensions);
    println!("║ Search Queries:       {:>10}                             ║", config.search_queries);
    println!("║ Stalled Instances:    {:>10}                             ║", config.stalled_instances);
    println!("║ Stall:                {:>10.2?}                         ║", config.stall);
    println!("║ Max Timeout:          {:>10.2?}                         ║", config.super_lambda.max_timeout);
    println!("║ Storage:              {:>10?}                            ║", config.storage_type);
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let results = SimulationRunner::new(config).run().await?;
    results.print_summary();

    Ok(())
}
