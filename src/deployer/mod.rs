//! Deployer / orchestrator
//!
//! Brings one database + collection pair up and down:
//!
//! ```text
//! deploy:  collection resources ─▶ liveness table ─▶ for every planned instance (concurrently):
//!              row = updating ─▶ create ─▶ poll until active ─▶ row = active
//!          any failure: delete every planned instance and its row
//! destroy: for every row: delete instance ─▶ delete row
//!              ─▶ liveness table ─▶ collection resources
//! wake:    /wait probe to the first N active instances
//! ```

#[cfg(feature = "aws")]
pub mod lambda;

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::collection::{provision_collection, resource_name, teardown_collection};
use crate::config::{CollectionConfig, DatabaseConfig, SuperLambdaConfig};
use crate::defaults::{DEFAULT_ACTIVATION_POLL_MS, DEFAULT_ACTIVATION_TIMEOUT_SECS};
use crate::error::{KnnError, Result};
use crate::invoker::{InstanceInvoker, InstanceRef, SuperLambda};
use crate::liveness::LivenessStore;
use crate::storage::StorageBackend;

/// Everything a provisioner needs to stand up one instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSpec {
    pub instance: InstanceRef,
    pub database_name: String,
    pub collection: CollectionConfig,
}

/// Creates and deletes physical compute instances
#[async_trait]
pub trait ComputeProvisioner: Send + Sync + 'static {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<()>;

    /// Whether the platform reports the instance healthy
    async fn is_active(&self, instance: &InstanceRef) -> Result<bool>;

    async fn delete_instance(&self, instance: &InstanceRef) -> Result<()>;
}

/// Instance names for a deployment: `{base}-m{i}` for main-region replicas,
/// `{base}-{region}` for each secondary region
pub fn plan_instances(base: &str, database: &DatabaseConfig, main_region_fallbacks: usize) -> Vec<InstanceRef> {
    let main = (0..=main_region_fallbacks)
        .map(|i| InstanceRef::new(format!("{}-m{}", base, i), &database.main_region));
    let secondary = database
        .secondary_regions
        .iter()
        .map(|region| InstanceRef::new(format!("{}-{}", base, region), region));
    main.chain(secondary).collect()
}

pub struct Orchestrator {
    database: DatabaseConfig,
    collection: CollectionConfig,
    config: SuperLambdaConfig,
    backend: StorageBackend,
    provisioner: Arc<dyn ComputeProvisioner>,
    liveness: LivenessStore,
    activation_poll: Duration,
    activation_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        database: DatabaseConfig,
        collection: CollectionConfig,
        config: SuperLambdaConfig,
        backend: StorageBackend,
        provisioner: Arc<dyn ComputeProvisioner>,
    ) -> Result<Self> {
        database.validate()?;
        collection.validate()?;

        let base = resource_name(&database.database_name, &collection.collection_name);
        let liveness = LivenessStore::new(backend.table.clone(), LivenessStore::table_name(&base));

        Ok(Self {
            database,
            collection,
            config,
            backend,
            provisioner,
            liveness,
            activation_poll: Duration::from_millis(DEFAULT_ACTIVATION_POLL_MS),
            activation_timeout: Duration::from_secs(DEFAULT_ACTIVATION_TIMEOUT_SECS),
        })
    }

    pub fn with_activation_timing(mut self, poll: Duration, timeout: Duration) -> Self {
        self.activation_poll = poll;
        self.activation_timeout = timeout;
        self
    }

    pub fn base_name(&self) -> String {
        resource_name(&self.database.database_name, &self.collection.collection_name)
    }

    pub fn liveness(&self) -> &LivenessStore {
        &self.liveness
    }

    pub fn plan(&self) -> Vec<InstanceRef> {
        plan_instances(&self.base_name(), &self.database, self.config.main_region_fallbacks)
    }

    /// Invoker bound to this deployment's liveness table
    pub fn super_lambda(&self, invoker: Arc<dyn InstanceInvoker>) -> SuperLambda {
        SuperLambda::new(
            self.database.database_name.clone(),
            self.database.main_region.clone(),
            self.liveness.clone(),
            invoker,
            self.config.clone(),
        )
    }

    /// Create durable resources and every planned instance. Returns once all
    /// instances are active.
    pub async fn deploy(&self) -> Result<Vec<InstanceRef>> {
        let plan = self.plan();
        tracing::info!(base = %self.base_name(), instances = plan.len(), "Deploying");

        provision_collection(&self.database.database_name, &self.collection, &self.backend).await?;
        self.liveness.create().await?;

        let outcomes = join_all(plan.iter().map(|instance| self.deploy_instance(instance))).await;
        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        if let Some(err) = outcomes.into_iter().find_map(|o| o.err()) {
            tracing::error!(
                base = %self.base_name(),
                failed,
                planned = plan.len(),
                error = %err,
                "Deploy failed, rolling back instances"
            );
            self.rollback(&plan).await;
            return Err(err);
        }

        tracing::info!(base = %self.base_name(), instances = plan.len(), "Deployment active");
        Ok(plan)
    }

    /// Best-effort removal of every planned instance and its liveness row.
    /// Durable collection resources are kept so a retried deploy can reuse them.
    async fn rollback(&self, plan: &[InstanceRef]) {
        for instance in plan {
            if let Err(e) = self.provisioner.delete_instance(instance).await {
                tracing::warn!(instance = %instance, error = %e, "Rollback: instance not deleted");
            }
            if let Err(e) = self.liveness.remove(&instance.name, &instance.region).await {
                tracing::warn!(instance = %instance, error = %e, "Rollback: row not removed");
            }
        }
    }

    async fn deploy_instance(&self, instance: &InstanceRef) -> Result<()> {
        self.liveness
            .register(&instance.name, &instance.region)
            .await?;

        let spec = InstanceSpec {
            instance: instance.clone(),
            database_name: self.database.database_name.clone(),
            collection: self.collection.clone(),
        };
        self.provisioner.create_instance(&spec).await?;
        self.wait_until_active(instance).await?;

        self.liveness
            .mark_active(&instance.name, &instance.region)
            .await?;
        tracing::info!(instance = %instance, "Instance active");
        Ok(())
    }

    async fn wait_until_active(&self, instance: &InstanceRef) -> Result<()> {
        let poll = async {
            loop {
                if self.provisioner.is_active(instance).await? {
                    return Ok::<(), KnnError>(());
                }
                tokio::time::sleep(self.activation_poll).await;
            }
        };

        tokio::time::timeout(self.activation_timeout, poll)
            .await
            .map_err(|_| {
                KnnError::deploy(format!(
                    "{} not active after {:?}",
                    instance, self.activation_timeout
                ))
            })?
    }

    /// Delete every recorded instance, then the liveness table and the
    /// collection resources
    pub async fn destroy(&self) -> Result<()> {
        let rows = match self.liveness.rows().await {
            Ok(rows) => rows,
            Err(KnnError::Storage(crate::storage::StorageError::TableNotFound { .. })) => Vec::new(),
            Err(e) => return Err(e),
        };

        for row in rows {
            let instance = InstanceRef::new(&row.name, &row.region);
            self.provisioner.delete_instance(&instance).await?;
            self.liveness.remove(&row.name, &row.region).await?;
            tracing::info!(instance = %instance, "Instance deleted");
        }

        self.liveness.destroy().await?;
        teardown_collection(&self.database.database_name, &self.collection, &self.backend).await?;

        tracing::info!(base = %self.base_name(), "Deployment destroyed");
        Ok(())
    }

    /// Pre-warm `awakeInstances` instances; returns the ids that answered
    pub async fn wake(&self, invoker: Arc<dyn InstanceInvoker>) -> Result<BTreeSet<String>> {
        self.super_lambda(invoker)
            .wake(self.database.awake_instances)
            .await
    }
}
