//! AWS Lambda compute
//!
//! One function per planned instance, created in the instance's region from a
//! shared deployment package in S3. The package runs `knn-instance`, which
//! talks to the Lambda runtime API when it finds one.

use async_trait::async_trait;
use aws_sdk_lambda::types::{
    Architecture, Environment, FunctionCode, LastUpdateStatus, Runtime, State,
};
use aws_sdk_lambda::Client as LambdaClient;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::{ComputeProvisioner, InstanceSpec};
use crate::config::DatabaseConfig;
use crate::error::{KnnError, Result};
use crate::invoker::InstanceRef;

/// Lambda clients for every region a deployment spans
pub struct LambdaClients {
    clients: HashMap<String, LambdaClient>,
}

impl LambdaClients {
    /// Load credentials from the default provider chain once per region
    pub async fn load<I, S>(regions: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut clients = HashMap::new();
        for region in regions {
            let region = region.into();
            if clients.contains_key(&region) {
                continue;
            }
            let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_config::Region::new(region.clone()))
                .load()
                .await;
            info!(region = %region, "Loaded Lambda client");
            clients.insert(region, LambdaClient::new(&config));
        }

        Arc::new(Self { clients })
    }

    /// Clients for the main and every secondary region of a database
    pub async fn for_database(database: &DatabaseConfig) -> Arc<Self> {
        let regions = std::iter::once(&database.main_region).chain(&database.secondary_regions);
        Self::load(regions.cloned()).await
    }

    pub fn client(&self, region: &str) -> Result<&LambdaClient> {
        self.clients
            .get(region)
            .ok_or_else(|| KnnError::config(format!("no Lambda client for region {}", region)))
    }
}

/// Settings shared by every function of a deployment
#[derive(Debug, Clone)]
pub struct LambdaFunctionConfig {
    /// Execution role; needs DynamoDB and S3 access to the collection
    pub role_arn: String,
    /// Deployment package (a zip holding the `bootstrap` binary)
    pub code_bucket: String,
    pub code_key: String,
    pub memory_mb: i32,
    pub timeout_secs: i32,
    /// Bucket holding static collection snapshots
    pub snapshot_bucket: String,
    /// Region of the collection tables; every instance reads from here
    pub storage_region: String,
}

/// Environment handed to one function, in the variables `Config::from_env` reads
pub fn function_environment(
    spec: &InstanceSpec,
    config: &LambdaFunctionConfig,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        ("INSTANCE_ID".to_string(), spec.instance.name.clone()),
        ("DATABASE_NAME".to_string(), spec.database_name.clone()),
        ("MAIN_REGION".to_string(), config.storage_region.clone()),
        ("COLLECTION_NAME".to_string(), spec.collection.collection_name.clone()),
        ("DIMENSIONS".to_string(), spec.collection.dimensions.to_string()),
        ("COLLECTION_TYPE".to_string(), spec.collection.kind.as_str().to_string()),
        ("STORAGE_MODE".to_string(), "aws".to_string()),
        ("STORAGE_REGION".to_string(), config.storage_region.clone()),
        ("S3_BUCKET".to_string(), config.snapshot_bucket.clone()),
    ]);
    if let Some(size) = spec.collection.size {
        env.insert("COLLECTION_SIZE".to_string(), size.to_string());
    }
    env
}

/// Creates, polls and deletes one Lambda function per instance
pub struct LambdaProvisioner {
    clients: Arc<LambdaClients>,
    config: LambdaFunctionConfig,
}

impl LambdaProvisioner {
    pub fn new(clients: Arc<LambdaClients>, config: LambdaFunctionConfig) -> Self {
        Self { clients, config }
    }
}

#[async_trait]
impl ComputeProvisioner for LambdaProvisioner {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<()> {
        let client = self.clients.client(&spec.instance.region)?;

        let variables = function_environment(spec, &self.config);
        let environment = Environment::builder()
            .set_variables(Some(variables.into_iter().collect()))
            .build();
        let code = FunctionCode::builder()
            .s3_bucket(&self.config.code_bucket)
            .s3_key(&self.config.code_key)
            .build();

        let result = client
            .create_function()
            .function_name(&spec.instance.name)
            .runtime(Runtime::from("provided.al2023"))
            .handler("bootstrap")
            .architectures(Architecture::Arm64)
            .role(&self.config.role_arn)
            .code(code)
            .memory_size(self.config.memory_mb)
            .timeout(self.config.timeout_secs)
            .environment(environment)
            .send()
            .await;

        match result {
            Ok(_) => info!(instance = %spec.instance, "Created Lambda function"),
            Err(e) => {
                let service_error = e.into_service_error();
                if !service_error.is_resource_conflict_exception() {
                    return Err(KnnError::deploy(format!(
                        "create function {} failed: {}",
                        spec.instance, service_error
                    )));
                }
                debug!(instance = %spec.instance, "Lambda function already exists");
            }
        }
        Ok(())
    }

    async fn is_active(&self, instance: &InstanceRef) -> Result<bool> {
        let client = self.clients.client(&instance.region)?;

        let response = match client.get_function().function_name(&instance.name).send().await {
            Ok(response) => response,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    return Ok(false);
                }
                return Err(KnnError::deploy(format!(
                    "get function {} failed: {}",
                    instance, service_error
                )));
            }
        };

        let Some(configuration) = response.configuration() else {
            return Ok(false);
        };
        let state = configuration.state();
        debug!(instance = %instance, state = ?state, "Lambda function state");

        match state {
            Some(State::Failed) => Err(KnnError::deploy(format!(
                "{} failed to start: {}",
                instance,
                configuration.state_reason().unwrap_or("unknown reason")
            ))),
            Some(State::Active) => Ok(!matches!(
                configuration.last_update_status(),
                Some(LastUpdateStatus::InProgress)
            )),
            _ => Ok(false),
        }
    }

    async fn delete_instance(&self, instance: &InstanceRef) -> Result<()> {
        let client = self.clients.client(&instance.region)?;

        match client.delete_function().function_name(&instance.name).send().await {
            Ok(_) => {
                info!(instance = %instance, "Deleted Lambda function");
                Ok(())
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    Ok(())
                } else {
                    Err(KnnError::deploy(format!(
                        "delete function {} failed: {}",
                        instance, service_error
                    )))
                }
            }
        }
    }
}
