//! HTTP invoker for instances served by the `knn-instance` binary

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Method};
use serde_json::Value;
use std::collections::HashMap;

use super::{InstanceInvoker, InstanceRef};
use crate::error::{KnnError, Result};
use crate::handler::{Envelope, EnvelopeResponse};

/// Maps instance names to base URLs and forwards envelopes as HTTP requests
pub struct HttpInvoker {
    client: Client,
    endpoints: RwLock<HashMap<String, String>>,
}

impl Default for HttpInvoker {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl HttpInvoker {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Route `name` to `base_url` (e.g. `http://10.0.0.5:8080`)
    pub fn register(&self, name: impl Into<String>, base_url: impl Into<String>) {
        let base_url = base_url.into();
        self.endpoints
            .write()
            .insert(name.into(), base_url.trim_end_matches('/').to_string());
    }

    pub fn unregister(&self, name: &str) {
        self.endpoints.write().remove(name);
    }

    fn url(&self, instance: &InstanceRef, path: &str) -> Result<String> {
        let endpoints = self.endpoints.read();
        let base = endpoints
            .get(&instance.name)
            .ok_or_else(|| KnnError::invocation(format!("no endpoint for {}", instance)))?;
        Ok(format!("{}{}", base, path))
    }
}

#[async_trait]
impl InstanceInvoker for HttpInvoker {
    async fn invoke(&self, instance: &InstanceRef, request: Envelope) -> Result<EnvelopeResponse> {
        let url = self.url(instance, &request.path)?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| KnnError::invocation(e.to_string()))?;

        let response = self
            .client
            .request(method, &url)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| KnnError::invocation(format!("{}: {}", url, e)))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| KnnError::invocation(e.to_string()))?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        Ok(EnvelopeResponse { status, body })
    }
}
