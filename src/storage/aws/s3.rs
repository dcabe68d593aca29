//! S3 Object Storage Implementation
//!
//! Implements the ObjectStorage trait for real AWS S3. Static collection
//! snapshots are the only objects this crate writes.

use super::AwsContext;
use crate::storage::{ObjectInfo, ObjectStorage, StorageError, StorageResult};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// S3-backed object storage rooted at `bucket/prefix`
pub struct S3ObjectStorage {
    context: Arc<AwsContext>,
    bucket: String,
    prefix: String,
}

impl S3ObjectStorage {
    /// Open a bucket, creating it in the context's region if it is missing
    pub async fn open(context: Arc<AwsContext>, bucket: &str, prefix: &str) -> StorageResult<Self> {
        let client = context.s3_client();

        let exists = client.head_bucket().bucket(bucket).send().await.is_ok();
        if !exists {
            let region = context.region();
            let request = client.create_bucket().bucket(bucket);

            // us-east-1 rejects an explicit LocationConstraint
            let request = if region == "us-east-1" {
                request
            } else {
                let cfg = CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build();
                request.create_bucket_configuration(cfg)
            };

            request
                .send()
                .await
                .map_err(|e| StorageError::Backend(format!("Failed to create bucket: {}", e)))?;

            info!(bucket = %bucket, region = %region, "Created S3 bucket");
        }

        Ok(Self {
            context,
            bucket: bucket.to_string(),
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    fn relative_key(&self, key: &str) -> String {
        match key.strip_prefix(&self.prefix) {
            Some(rest) if !self.prefix.is_empty() => rest.trim_start_matches('/').to_string(),
            _ => key.to_string(),
        }
    }

    /// Get bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let full_key = self.full_key(key);

        self.context
            .s3_client()
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("S3 put failed: {}", e)))?;

        debug!(bucket = %self.bucket, key = %full_key, "Put object to S3");
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let full_key = self.full_key(key);

        let response = self
            .context
            .s3_client()
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StorageError::NotFound {
                        key: full_key.clone(),
                    }
                } else {
                    StorageError::Backend(format!("S3 get failed: {}", service_error))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to read S3 body: {}", e)))?;

        debug!(bucket = %self.bucket, key = %full_key, "Got object from S3");
        Ok(data.into_bytes())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let result = self
            .context
            .s3_client()
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await;

        Ok(result.is_ok())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let full_key = self.full_key(key);

        self.context
            .s3_client()
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("S3 delete failed: {}", e)))?;

        debug!(bucket = %self.bucket, key = %full_key, "Deleted object from S3");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let full_prefix = self.full_key(prefix);
        let client = self.context.s3_client();

        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| StorageError::Backend(format!("S3 list failed: {}", e)))?;

            for object in response.contents() {
                let (Some(key), Some(size)) = (object.key(), object.size()) else {
                    continue;
                };

                let last_modified = object
                    .last_modified()
                    .and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
                    .unwrap_or_else(chrono::Utc::now);

                objects.push(ObjectInfo {
                    key: self.relative_key(key),
                    size: size.max(0) as u64,
                    last_modified,
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(bucket = %self.bucket, prefix = %full_prefix, count = objects.len(), "Listed objects from S3");
        Ok(objects)
    }
}
