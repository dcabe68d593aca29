//! Process-lifetime engine cache keyed by instance identity

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::KnnEngine;

#[derive(Default)]
pub struct EngineRegistry {
    engines: RwLock<HashMap<String, Arc<KnnEngine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine for `instance_id`, created with `create` on first use
    pub fn get_or_insert_with(
        &self,
        instance_id: &str,
        create: impl FnOnce() -> KnnEngine,
    ) -> Arc<KnnEngine> {
        if let Some(engine) = self.engines.read().get(instance_id) {
            return engine.clone();
        }

        self.engines
            .write()
            .entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(create()))
            .clone()
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<KnnEngine>> {
        self.engines.read().get(instance_id).cloned()
    }

    /// Drop an instance's engine; the next use bootstraps from scratch
    pub fn recycle(&self, instance_id: &str) -> bool {
        self.engines.write().remove(instance_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.engines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }
}
