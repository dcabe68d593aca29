//! HTTP API
//!
//! Exposes one instance's request handler over HTTP:
//! - POST /knn - optional updates, then search
//! - POST /wait - liveness / wake probe
//! - GET /health - engine statistics
//!
//! Inside AWS Lambda the same handler is driven by the runtime API instead;
//! see `runtime`.
//!
//! Every path except `/health` is forwarded to the handler as an envelope, so
//! status codes (400/404/405) come from the same place as for in-process calls.

mod runtime;

pub use runtime::serve_runtime;

use crate::collection::{open_collection, provision_collection};
use crate::config::{ApiConfig, Config, StorageConfig};
use crate::engine::{EngineStats, KnnEngine};
use crate::handler::{Envelope, RequestHandler};
use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// API state
pub struct ApiState {
    pub handler: RequestHandler,
}

/// Build the router for one instance
pub fn router(handler: RequestHandler) -> Router {
    let state = Arc::new(ApiState { handler });

    Router::new()
        .route("/health", get(health))
        .fallback(dispatch)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire storage, collection and engine for one instance from its config.
///
/// Mock tables live in process memory, so nobody else can create the
/// collection table for this instance; it is provisioned here. Durable
/// backends are provisioned by the deployer.
pub async fn build_handler(config: &Config) -> anyhow::Result<RequestHandler> {
    let backend = config.storage.create_backend().await?;
    tracing::info!(durable = backend.is_some(), "Storage backend initialized");

    if let (StorageConfig::Mock { .. }, Some(backend)) = (&config.storage, backend.as_ref()) {
        if config.collection.kind == crate::config::CollectionType::Dynamic {
            provision_collection(&config.database.database_name, &config.collection, backend)
                .await?;
        }
    }

    let collection = open_collection(
        &config.database.database_name,
        &config.collection,
        backend.as_ref(),
    )?;
    let engine = Arc::new(KnnEngine::new(collection, config.engine.clone()));

    Ok(RequestHandler::new(engine, config.instance_id.clone()))
}

/// Serve the API
pub async fn serve(handler: RequestHandler, config: ApiConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(instance = %handler.instance_id(), "Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(handler)).await?;

    Ok(())
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Health check
async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        instance_id: state.handler.instance_id().to_string(),
        timestamp: chrono::Utc::now(),
        engine: state.handler.engine().stats(),
    })
}

/// Forward anything else to the request handler
async fn dispatch(
    State(state): State<Arc<ApiState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let envelope = Envelope {
        method: method.to_string(),
        path: uri.path().to_string(),
        body,
    };
    let response = state.handler.handle(envelope).await;

    let status = StatusCode::from_u16(response.status)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((status, Json(response.body)).into_response())
}

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    instance_id: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    engine: EngineStats,
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
