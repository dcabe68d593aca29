//! AWS storage implementations
//!
//! Provides real S3 object storage and DynamoDB tables for production
//! deployments. Clients are built once per region and shared.

mod dynamodb;
mod s3;

pub use dynamodb::DynamoTableStorage;
pub use s3::S3ObjectStorage;

use crate::storage::StorageBackend;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use std::sync::Arc;
use tracing::info;

/// Shared AWS clients for one region
pub struct AwsContext {
    s3_client: S3Client,
    dynamodb_client: DynamoClient,
    region: String,
}

impl AwsContext {
    /// Load credentials from the default provider chain for `region`
    pub async fn new(region: &str) -> Arc<Self> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        info!(region = %region, "Loaded AWS configuration");

        Arc::new(Self {
            s3_client: S3Client::new(&config),
            dynamodb_client: DynamoClient::new(&config),
            region: region.to_string(),
        })
    }

    /// Get the S3 client
    pub fn s3_client(&self) -> &S3Client {
        &self.s3_client
    }

    /// Get the DynamoDB client
    pub fn dynamodb_client(&self) -> &DynamoClient {
        &self.dynamodb_client
    }

    /// Get the region
    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Create DynamoDB + S3 backed storage
///
/// Snapshot objects for static collections live under `s3_prefix` in
/// `s3_bucket`; the bucket is created if it does not exist.
pub async fn create_aws_storage(
    region: &str,
    s3_bucket: &str,
    s3_prefix: &str,
) -> anyhow::Result<StorageBackend> {
    let context = AwsContext::new(region).await;
    let table = DynamoTableStorage::new(context.clone());
    let object = S3ObjectStorage::open(context, s3_bucket, s3_prefix).await?;

    Ok(StorageBackend::new(table, object))
}
