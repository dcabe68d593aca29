//! Index instance entry point
//!
//! Serves one collection's search handler over HTTP, or over the Lambda
//! runtime API when started inside a function. Everything is read from the
//! environment; see `Config::from_env`.

use serverless_knn::{api, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,serverless_knn=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting index instance...");

    let config = Config::from_env()?;
    tracing::info!("Loaded config: {:?}", config);

    let handler = api::build_handler(&config).await?;

    // Bootstrapping here only shortens the first request; a failure is retried
    // lazily by the first search.
    if std::env::var("EAGER_BOOTSTRAP").map(|v| v == "true").unwrap_or(false) {
        match handler.engine().ensure_ready().await {
            Ok(index) => tracing::info!(vectors = index.len(), "Index bootstrapped"),
            Err(e) => tracing::warn!(error = %e, "Eager bootstrap failed"),
        }
    }

    match std::env::var("AWS_LAMBDA_RUNTIME_API") {
        Ok(endpoint) => api::serve_runtime(handler, &endpoint).await?,
        Err(_) => api::serve(handler, config.api).await?,
    }

    Ok(())
}
