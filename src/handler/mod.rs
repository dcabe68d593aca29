//! Request handler
//!
//! Transport-neutral translation from a method + path + JSON body envelope to
//! engine calls. The same handler sits behind the HTTP server and behind the
//! in-process compute pool, so both answer identically.
//!
//! Routes (POST only):
//! - `/knn`  - optional update batch, then top-k search
//! - `/wait` - sleep, then report the instance id (liveness / wake probe)

use axum::http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::defaults::DEFAULT_TOP_K;
use crate::engine::{KnnEngine, SearchResult};
use crate::error::KnnError;
use crate::vectors::{check_vector, Change, ChangeRecord, Timestamp};

pub const KNN_PATH: &str = "/knn";
pub const WAIT_PATH: &str = "/wait";

/// Generic request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Value,
}

impl Envelope {
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST.to_string(),
            path: path.into(),
            body,
        }
    }

    /// `/knn` envelope from a typed request
    pub fn knn(request: &KnnRequest) -> Self {
        Self::post(KNN_PATH, serde_json::to_value(request).unwrap_or(Value::Null))
    }

    /// `/wait` envelope sleeping for `time_ms`
    pub fn wait(time_ms: u64) -> Self {
        Self::post(WAIT_PATH, json!({ "time": time_ms }))
    }
}

/// Generic response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeResponse {
    pub status: u16,
    pub body: Value,
}

impl EnvelopeResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK.as_u16(),
            body,
        }
    }

    pub fn error(status: StatusCode, message: impl std::fmt::Display) -> Self {
        Self {
            status: status.as_u16(),
            body: json!({ "error": message.to_string() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode a successful body
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> crate::error::Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| KnnError::deserialization(e.to_string()))
    }
}

fn default_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnnRequest {
    pub query: Vec<f32>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<Vec<Change>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_timestamp: Option<Timestamp>,
}

impl KnnRequest {
    pub fn new(query: Vec<f32>, k: usize) -> Self {
        Self {
            query,
            k,
            updates: None,
            update_timestamp: None,
        }
    }

    pub fn with_updates(mut self, updates: Vec<Change>, timestamp: Timestamp) -> Self {
        self.updates = Some(updates);
        self.update_timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnnResponse {
    pub search_result: SearchResult,
    pub instance_id: String,
    pub last_update_timestamp: Timestamp,
}

#[derive(Debug, Clone, Deserialize)]
struct WaitRequest {
    time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitResponse {
    pub message: String,
    pub instance_id: String,
}

/// Handler bound to one engine and one instance identity
#[derive(Clone)]
pub struct RequestHandler {
    engine: Arc<KnnEngine>,
    instance_id: String,
}

impl RequestHandler {
    pub fn new(engine: Arc<KnnEngine>, instance_id: impl Into<String>) -> Self {
        Self {
            engine,
            instance_id: instance_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn engine(&self) -> &Arc<KnnEngine> {
        &self.engine
    }

    pub async fn handle(&self, request: Envelope) -> EnvelopeResponse {
        if !request.method.eq_ignore_ascii_case(Method::POST.as_str()) {
            return EnvelopeResponse::error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        }

        let response = match request.path.as_str() {
            KNN_PATH => self.knn(request.body).await,
            WAIT_PATH => self.wait(request.body).await,
            other => Err(HandlerError::NotFound(other.to_string())),
        };

        match response {
            Ok(body) => EnvelopeResponse::ok(body),
            Err(err) => {
                let status = err.status();
                if status.is_server_error() {
                    tracing::error!(instance = %self.instance_id, path = %request.path, error = %err, "Request failed");
                } else {
                    tracing::debug!(instance = %self.instance_id, path = %request.path, status = status.as_u16(), error = %err, "Request rejected");
                }
                EnvelopeResponse::error(status, err)
            }
        }
    }

    async fn knn(&self, body: Value) -> Result<Value, HandlerError> {
        let request: KnnRequest =
            serde_json::from_value(body).map_err(|e| HandlerError::BadRequest(e.to_string()))?;

        if request.k == 0 {
            return Err(HandlerError::BadRequest("k must be positive".into()));
        }
        // Checked before any update so a bad query mutates nothing
        check_vector(self.engine.dimensions(), &request.query)?;

        if let Some(updates) = request.updates {
            let timestamp = request.update_timestamp.ok_or_else(|| {
                HandlerError::BadRequest("updateTimestamp is required with updates".into())
            })?;
            let records: Vec<ChangeRecord> = updates
                .into_iter()
                .map(|change| change.into_record(timestamp))
                .collect();
            self.engine.update(&records).await?;
        }

        let search_result = self.engine.search(&request.query, request.k).await?;

        let response = KnnResponse {
            search_result,
            instance_id: self.instance_id.clone(),
            last_update_timestamp: self.engine.last_time_updated(),
        };
        serde_json::to_value(response).map_err(|e| HandlerError::Internal(e.to_string()))
    }

    async fn wait(&self, body: Value) -> Result<Value, HandlerError> {
        let request: WaitRequest =
            serde_json::from_value(body).map_err(|e| HandlerError::BadRequest(e.to_string()))?;

        tokio::time::sleep(Duration::from_millis(request.time)).await;

        let response = WaitResponse {
            message: "OK".to_string(),
            instance_id: self.instance_id.clone(),
        };
        serde_json::to_value(response).map_err(|e| HandlerError::Internal(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Engine(#[from] KnnError),

    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    fn status(&self) -> StatusCode {
        match self {
            HandlerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HandlerError::NotFound(_) => StatusCode::NOT_FOUND,
            HandlerError::Engine(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            HandlerError::Engine(_) | HandlerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{Collection, MemoryCollection};
    use crate::config::EngineConfig;
    use crate::vectors::LabeledVector;

    async fn handler() -> RequestHandler {
        let collection = Arc::new(MemoryCollection::new("db-c", 3));
        collection
            .add(vec![
                LabeledVector::new(1, vec![1.0, 2.0, 3.0]),
                LabeledVector::new(2, vec![4.0, 5.0, 6.0]),
                LabeledVector::new(3, vec![7.0, 8.0, 9.0]),
            ])
            .await
            .unwrap();
        let engine = Arc::new(KnnEngine::new(collection, EngineConfig::default()));
        RequestHandler::new(engine, "instance-1")
    }

    #[tokio::test]
    async fn test_knn_route() {
        let handler = handler().await;
        let response = handler
            .handle(Envelope::post(KNN_PATH, json!({"query": [1.0, 2.0, 3.0], "k": 3})))
            .await;

        assert_eq!(response.status, 200);
        let body: KnnResponse = response.decode().unwrap();
        assert_eq!(body.search_result.neighbors, vec![1, 2, 3]);
        assert_eq!(body.search_result.distances, vec![0.0, 27.0, 108.0]);
        assert_eq!(body.instance_id, "instance-1");
        assert!(response.body.get("lastUpdateTimestamp").is_some());
    }

    #[tokio::test]
    async fn test_k_defaults_to_one() {
        let handler = handler().await;
        let response = handler
            .handle(Envelope::post(KNN_PATH, json!({"query": [4.0, 5.0, 6.0]})))
            .await;
        let body: KnnResponse = response.decode().unwrap();
        assert_eq!(body.search_result.neighbors, vec![2]);
    }

    #[tokio::test]
    async fn test_updates_applied_before_search() {
        let handler = handler().await;
        let request = KnnRequest::new(vec![1.0, 2.0, 3.0], 3)
            .with_updates(vec![Change::tombstone(1)], 500);
        let response = handler.handle(Envelope::knn(&request)).await;

        let body: KnnResponse = response.decode().unwrap();
        assert_eq!(body.search_result.neighbors, vec![2, 3]);
        assert_eq!(body.search_result.distances, vec![27.0, 108.0]);
    }

    #[tokio::test]
    async fn test_updates_require_timestamp() {
        let handler = handler().await;
        let response = handler
            .handle(Envelope::post(
                KNN_PATH,
                json!({"query": [1.0, 2.0, 3.0], "updates": [{"label": 1, "deactivated": true}]}),
            ))
            .await;
        assert_eq!(response.status, 400);

        // The tombstone was not applied
        let response = handler
            .handle(Envelope::post(KNN_PATH, json!({"query": [1.0, 2.0, 3.0]})))
            .await;
        let body: KnnResponse = response.decode().unwrap();
        assert_eq!(body.search_result.neighbors, vec![1]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_bad_request() {
        let handler = handler().await;
        let request = KnnRequest::new(vec![1.0, 2.0], 1)
            .with_updates(vec![Change::upsert(7, vec![0.0, 0.0, 0.0])], 1);
        let response = handler.handle(Envelope::knn(&request)).await;

        assert_eq!(response.status, 400);

        let response = handler
            .handle(Envelope::post(KNN_PATH, json!({"query": [0.0, 0.0, 0.0], "k": 4})))
            .await;
        let body: KnnResponse = response.decode().unwrap();
        assert!(!body.search_result.neighbors.contains(&7));
    }

    #[tokio::test]
    async fn test_bad_k_and_body() {
        let handler = handler().await;
        let zero = handler
            .handle(Envelope::post(KNN_PATH, json!({"query": [1.0, 2.0, 3.0], "k": 0})))
            .await;
        assert_eq!(zero.status, 400);

        let malformed = handler
            .handle(Envelope::post(KNN_PATH, json!({"vector": [1.0]})))
            .await;
        assert_eq!(malformed.status, 400);
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let handler = handler().await;

        let get = Envelope {
            method: "GET".into(),
            path: KNN_PATH.into(),
            body: Value::Null,
        };
        assert_eq!(handler.handle(get).await.status, 405);

        let unknown = Envelope::post("/nope", json!({}));
        assert_eq!(handler.handle(unknown).await.status, 404);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_route() {
        let handler = handler().await;
        let started = tokio::time::Instant::now();
        let response = handler.handle(Envelope::wait(250)).await;

        assert!(started.elapsed() >= Duration::from_millis(250));
        let body: WaitResponse = response.decode().unwrap();
        assert_eq!(body.message, "OK");
        assert_eq!(body.instance_id, "instance-1");
    }
}
