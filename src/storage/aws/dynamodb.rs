//! DynamoDB Table Storage Implementation
//!
//! Every table shares one layout: string partition key `pk`, string sort key
//! `sk`, numeric `ts` (filterable write time) and binary `body`.

use super::AwsContext;
use crate::storage::{RowKey, ScanFilter, StorageError, StorageResult, TableRow, TableStorage};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType, TableStatus,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const PARTITION_KEY: &str = "pk";
const SORT_KEY: &str = "sk";
const TIMESTAMP: &str = "ts";
const BODY: &str = "body";

/// Polls allowed while waiting for a new table to become ACTIVE
const TABLE_ACTIVE_POLLS: usize = 120;
const TABLE_ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// DynamoDB-backed key-value tables
pub struct DynamoTableStorage {
    context: Arc<AwsContext>,
}

impl DynamoTableStorage {
    pub fn new(context: Arc<AwsContext>) -> Self {
        Self { context }
    }

    fn key_attributes(key: &RowKey) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (PARTITION_KEY.to_string(), AttributeValue::S(key.partition.clone())),
            (SORT_KEY.to_string(), AttributeValue::S(key.sort.clone())),
        ])
    }

    fn row_from_item(item: &HashMap<String, AttributeValue>) -> StorageResult<TableRow> {
        let string = |name: &str| -> StorageResult<String> {
            item.get(name)
                .and_then(|v| v.as_s().ok())
                .cloned()
                .ok_or_else(|| StorageError::Serialization(format!("item is missing '{}'", name)))
        };

        let timestamp = item
            .get(TIMESTAMP)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<i64>().ok())
            .unwrap_or(0);

        let body = item
            .get(BODY)
            .and_then(|v| v.as_b().ok())
            .map(|blob| Bytes::copy_from_slice(blob.as_ref()))
            .unwrap_or_default();

        Ok(TableRow {
            key: RowKey::new(string(PARTITION_KEY)?, string(SORT_KEY)?),
            timestamp,
            body,
        })
    }

    async fn wait_until_active(&self, table: &str) -> StorageResult<()> {
        let client = self.context.dynamodb_client();

        for _ in 0..TABLE_ACTIVE_POLLS {
            let response = client
                .describe_table()
                .table_name(table)
                .send()
                .await
                .map_err(|e| StorageError::Backend(format!("DynamoDB describe failed: {}", e)))?;

            let status = response.table().and_then(|t| t.table_status());
            if matches!(status, Some(TableStatus::Active)) {
                return Ok(());
            }

            tokio::time::sleep(TABLE_ACTIVE_POLL_INTERVAL).await;
        }

        Err(StorageError::Backend(format!(
            "table {} did not become active",
            table
        )))
    }
}

fn build_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(format!("invalid DynamoDB request: {}", e))
}

const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";
const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailedException";

/// Map a failed row operation by its service error code. A missing table is
/// reported as `TableNotFound` so callers can treat it as already torn down.
fn row_error(
    table: &str,
    op: &str,
    code: Option<&str>,
    e: impl std::fmt::Display,
) -> StorageError {
    match code {
        Some(RESOURCE_NOT_FOUND) => StorageError::TableNotFound {
            table: table.to_string(),
        },
        _ => StorageError::Backend(format!("DynamoDB {} failed: {}", op, e)),
    }
}

#[async_trait]
impl TableStorage for DynamoTableStorage {
    async fn create_table(&self, table: &str) -> StorageResult<()> {
        let client = self.context.dynamodb_client();

        let attribute = |name: &str| {
            AttributeDefinition::builder()
                .attribute_name(name)
                .attribute_type(ScalarAttributeType::S)
                .build()
                .map_err(build_error)
        };
        let key = |name: &str, key_type: KeyType| {
            KeySchemaElement::builder()
                .attribute_name(name)
                .key_type(key_type)
                .build()
                .map_err(build_error)
        };

        let result = client
            .create_table()
            .table_name(table)
            .attribute_definitions(attribute(PARTITION_KEY)?)
            .attribute_definitions(attribute(SORT_KEY)?)
            .key_schema(key(PARTITION_KEY, KeyType::Hash)?)
            .key_schema(key(SORT_KEY, KeyType::Range)?)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        match result {
            Ok(_) => info!(table = %table, region = %self.context.region(), "Created DynamoDB table"),
            Err(e) => {
                let service_error = e.into_service_error();
                if !service_error.is_resource_in_use_exception() {
                    return Err(StorageError::Backend(format!(
                        "DynamoDB create table failed: {}",
                        service_error
                    )));
                }
                debug!(table = %table, "DynamoDB table already exists");
            }
        }

        self.wait_until_active(table).await
    }

    async fn delete_table(&self, table: &str) -> StorageResult<()> {
        let result = self
            .context
            .dynamodb_client()
            .delete_table()
            .table_name(table)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(table = %table, "Deleted DynamoDB table");
                Ok(())
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    Ok(())
                } else {
                    Err(StorageError::Backend(format!(
                        "DynamoDB delete table failed: {}",
                        service_error
                    )))
                }
            }
        }
    }

    async fn table_exists(&self, table: &str) -> StorageResult<bool> {
        let result = self
            .context
            .dynamodb_client()
            .describe_table()
            .table_name(table)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    Ok(false)
                } else {
                    Err(StorageError::Backend(format!(
                        "DynamoDB describe failed: {}",
                        service_error
                    )))
                }
            }
        }
    }

    async fn put(&self, table: &str, row: TableRow) -> StorageResult<()> {
        let mut item = Self::key_attributes(&row.key);
        item.insert(TIMESTAMP.to_string(), AttributeValue::N(row.timestamp.to_string()));
        item.insert(BODY.to_string(), AttributeValue::B(Blob::new(row.body.to_vec())));

        self.context
            .dynamodb_client()
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| {
                let e = e.into_service_error();
                row_error(table, "put", e.code(), &e)
            })?;

        Ok(())
    }

    async fn get(&self, table: &str, key: &RowKey) -> StorageResult<Option<TableRow>> {
        let response = self
            .context
            .dynamodb_client()
            .get_item()
            .table_name(table)
            .set_key(Some(Self::key_attributes(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| {
                let e = e.into_service_error();
                row_error(table, "get", e.code(), &e)
            })?;

        response.item().map(Self::row_from_item).transpose()
    }

    async fn delete(&self, table: &str, key: &RowKey) -> StorageResult<()> {
        self.context
            .dynamodb_client()
            .delete_item()
            .table_name(table)
            .set_key(Some(Self::key_attributes(key)))
            .send()
            .await
            .map_err(|e| {
                let e = e.into_service_error();
                row_error(table, "delete", e.code(), &e)
            })?;

        Ok(())
    }

    async fn delete_if_timestamp(
        &self,
        table: &str,
        key: &RowKey,
        timestamp: i64,
    ) -> StorageResult<bool> {
        let result = self
            .context
            .dynamodb_client()
            .delete_item()
            .table_name(table)
            .set_key(Some(Self::key_attributes(key)))
            .condition_expression("#ts = :ts")
            .expression_attribute_names("#ts", TIMESTAMP)
            .expression_attribute_values(":ts", AttributeValue::N(timestamp.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let e = e.into_service_error();
                match e.code() {
                    Some(CONDITIONAL_CHECK_FAILED) => {
                        debug!(table = %table, key = ?key, "Conditional delete skipped");
                        Ok(false)
                    }
                    code => Err(row_error(table, "conditional delete", code, &e)),
                }
            }
        }
    }

    async fn scan(&self, table: &str, filter: ScanFilter) -> StorageResult<Vec<TableRow>> {
        let client = self.context.dynamodb_client();
        let mut rows = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut request = client
                .scan()
                .table_name(table)
                .consistent_read(true)
                .set_exclusive_start_key(start_key.take());

            if let ScanFilter::UpdatedAfter(since) = filter {
                request = request
                    .filter_expression("#ts > :since")
                    .expression_attribute_names("#ts", TIMESTAMP)
                    .expression_attribute_values(":since", AttributeValue::N(since.to_string()));
            }

            let response = request.send().await.map_err(|e| {
                let e = e.into_service_error();
                row_error(table, "scan", e.code(), &e)
            })?;

            for item in response.items() {
                rows.push(Self::row_from_item(item)?);
            }

            match response.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        rows.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(table = %table, count = rows.len(), "Scanned DynamoDB table");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_error_maps_missing_table() {
        let err = row_error("db-gone", "scan", Some(RESOURCE_NOT_FOUND), "no such table");
        assert!(matches!(err, StorageError::TableNotFound { ref table } if table == "db-gone"));

        let err = row_error("db-c", "get", Some("ThrottlingException"), "slow down");
        assert!(matches!(err, StorageError::Backend(ref msg) if msg.contains("get")));

        let err = row_error("db-c", "delete", None, "dispatch failure");
        assert!(matches!(err, StorageError::Backend(_)));
    }
}
