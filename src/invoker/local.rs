//! In-process compute pool
//!
//! Stands in for a serverless platform: every instance is a request handler
//! with its own engine, serving one invocation at a time. Faults can be
//! injected per instance name to exercise the invoker's fallback paths.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{InstanceInvoker, InstanceRef};
use crate::collection::{open_collection, Collection};
use crate::config::EngineConfig;
use crate::deployer::{ComputeProvisioner, InstanceSpec};
use crate::engine::{EngineRegistry, KnnEngine};
use crate::error::{KnnError, Result};
use crate::handler::{Envelope, EnvelopeResponse, RequestHandler};
use crate::storage::StorageBackend;

/// Injected misbehaviour for one instance
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Sleep before handling; the call still completes afterwards
    Stall(Duration),
    /// Fail every invocation
    Fail(String),
}

struct LocalInstance {
    handler: RequestHandler,
    /// Serializes invocations, like a single-threaded function process
    busy: Mutex<()>,
    active_at: Instant,
    invocations: AtomicU64,
}

pub struct LocalComputePool {
    engine_config: EngineConfig,
    backend: Option<StorageBackend>,
    shared_collection: Option<Arc<dyn Collection>>,
    activation_delay: Duration,
    engines: EngineRegistry,
    instances: RwLock<HashMap<String, Arc<LocalInstance>>>,
    faults: RwLock<HashMap<String, Fault>>,
}

impl LocalComputePool {
    pub fn new(engine_config: EngineConfig) -> Self {
        Self {
            engine_config,
            backend: None,
            shared_collection: None,
            activation_delay: Duration::ZERO,
            engines: EngineRegistry::new(),
            instances: RwLock::new(HashMap::new()),
            faults: RwLock::new(HashMap::new()),
        }
    }

    /// Open each instance's collection from this backend
    pub fn with_backend(mut self, backend: StorageBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Bind every instance to the same collection object
    pub fn with_collection(mut self, collection: Arc<dyn Collection>) -> Self {
        self.shared_collection = Some(collection);
        self
    }

    /// Time between creation and reporting active
    pub fn with_activation_delay(mut self, delay: Duration) -> Self {
        self.activation_delay = delay;
        self
    }

    pub fn inject(&self, name: &str, fault: Fault) {
        tracing::debug!(instance = name, fault = ?fault, "Fault injected");
        self.faults.write().insert(name.to_string(), fault);
    }

    pub fn stall(&self, name: &str, duration: Duration) {
        self.inject(name, Fault::Stall(duration));
    }

    pub fn fail(&self, name: &str) {
        self.inject(name, Fault::Fail(format!("instance {} is failing", name)));
    }

    pub fn heal(&self, name: &str) {
        self.faults.write().remove(name);
    }

    /// Names of instances that currently exist
    pub fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Invocations that reached an instance (including ones later abandoned)
    pub fn invocation_count(&self, name: &str) -> u64 {
        self.instances
            .read()
            .get(name)
            .map_or(0, |i| i.invocations.load(Ordering::Relaxed))
    }

    /// Engine backing an instance, if it exists
    pub fn engine(&self, name: &str) -> Option<Arc<KnnEngine>> {
        self.engines.get(name)
    }

    fn instance(&self, name: &str) -> Option<Arc<LocalInstance>> {
        self.instances.read().get(name).cloned()
    }

    fn collection_for(&self, spec: &InstanceSpec) -> Result<Arc<dyn Collection>> {
        match &self.shared_collection {
            Some(collection) => Ok(collection.clone()),
            None => open_collection(&spec.database_name, &spec.collection, self.backend.as_ref()),
        }
    }
}

#[async_trait]
impl InstanceInvoker for LocalComputePool {
    async fn invoke(&self, instance: &InstanceRef, request: Envelope) -> Result<EnvelopeResponse> {
        let target = self
            .instance(&instance.name)
            .ok_or_else(|| KnnError::invocation(format!("instance {} does not exist", instance)))?;
        target.invocations.fetch_add(1, Ordering::Relaxed);

        let _busy = target.busy.lock().await;

        let fault = self.faults.read().get(&instance.name).cloned();
        match fault {
            Some(Fault::Stall(duration)) => tokio::time::sleep(duration).await,
            Some(Fault::Fail(message)) => return Err(KnnError::invocation(message)),
            None => {}
        }

        Ok(target.handler.handle(request).await)
    }
}

#[async_trait]
impl ComputeProvisioner for LocalComputePool {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<()> {
        let collection = self.collection_for(spec)?;
        let name = spec.instance.name.clone();

        let engine = self.engines.get_or_insert_with(&name, || {
            KnnEngine::new(collection, self.engine_config.clone())
        });
        let instance = LocalInstance {
            handler: RequestHandler::new(engine, name.clone()),
            busy: Mutex::new(()),
            active_at: Instant::now() + self.activation_delay,
            invocations: AtomicU64::new(0),
        };

        self.instances.write().insert(name.clone(), Arc::new(instance));
        tracing::debug!(instance = %spec.instance, "Local instance created");
        Ok(())
    }

    async fn is_active(&self, instance: &InstanceRef) -> Result<bool> {
        Ok(self
            .instance(&instance.name)
            .is_some_and(|i| Instant::now() >= i.active_at))
    }

    async fn delete_instance(&self, instance: &InstanceRef) -> Result<()> {
        self.instances.write().remove(&instance.name);
        self.engines.recycle(&instance.name);
        tracing::debug!(instance = %instance, "Local instance deleted");
        Ok(())
    }
}
