//! Lambda runtime API client
//!
//! Inside a Lambda function the handler is driven by polling the runtime API
//! instead of listening on a port. Each event is an `Envelope` and each reply
//! an `EnvelopeResponse`.

use anyhow::Context;
use axum::http::StatusCode;
use reqwest::Client;

use crate::handler::{Envelope, EnvelopeResponse, RequestHandler};

const RUNTIME_API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";

/// Poll `endpoint` (the value of `AWS_LAMBDA_RUNTIME_API`) forever
pub async fn serve_runtime(handler: RequestHandler, endpoint: &str) -> anyhow::Result<()> {
    let client = Client::new();
    let base = format!("http://{}/{}/runtime", endpoint, RUNTIME_API_VERSION);
    tracing::info!(instance = %handler.instance_id(), "Polling Lambda runtime API at {}", base);

    loop {
        handle_next(&client, &base, &handler).await?;
    }
}

/// Fetch one event, answer it and post the reply
async fn handle_next(client: &Client, base: &str, handler: &RequestHandler) -> anyhow::Result<()> {
    let event = client
        .get(format!("{}/invocation/next", base))
        .send()
        .await
        .context("fetching next invocation")?
        .error_for_status()?;

    let request_id = event
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .context("invocation without a request id")?;
    let payload = event.bytes().await?;

    let response = match serde_json::from_slice::<Envelope>(&payload) {
        Ok(envelope) => handler.handle(envelope).await,
        Err(e) => EnvelopeResponse::error(StatusCode::BAD_REQUEST, e),
    };
    tracing::debug!(request_id = %request_id, status = response.status, "Invocation handled");

    client
        .post(format!("{}/invocation/{}/response", base, request_id))
        .json(&response)
        .send()
        .await
        .context("posting invocation response")?
        .error_for_status()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{Collection, MemoryCollection};
    use crate::config::EngineConfig;
    use crate::engine::KnnEngine;
    use crate::vectors::LabeledVector;
    use axum::extract::{Path, State};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Runtime API stand-in: hands out queued events, records replies
    #[derive(Default)]
    struct FakeRuntime {
        events: Mutex<VecDeque<(String, Value)>>,
        replies: Mutex<Vec<(String, EnvelopeResponse)>>,
    }

    async fn next(State(runtime): State<Arc<FakeRuntime>>) -> axum::response::Response {
        match runtime.events.lock().pop_front() {
            Some((id, event)) => ([(REQUEST_ID_HEADER, id)], Json(event)).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn reply(
        State(runtime): State<Arc<FakeRuntime>>,
        Path(id): Path<String>,
        Json(body): Json<EnvelopeResponse>,
    ) -> StatusCode {
        runtime.replies.lock().push((id, body));
        StatusCode::ACCEPTED
    }

    async fn spawn_runtime(runtime: Arc<FakeRuntime>) -> String {
        let app = Router::new()
            .route("/2018-06-01/runtime/invocation/next", get(next))
            .route("/2018-06-01/runtime/invocation/:id/response", post(reply))
            .with_state(runtime);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/2018-06-01/runtime", addr)
    }

    async fn handler() -> RequestHandler {
        let collection = Arc::new(MemoryCollection::new("db-c", 3));
        collection
            .add(vec![LabeledVector::new(1, vec![1.0, 2.0, 3.0])])
            .await
            .unwrap();
        let engine = Arc::new(KnnEngine::new(collection, EngineConfig::default()));
        RequestHandler::new(engine, "fn-1")
    }

    #[tokio::test]
    async fn test_events_are_answered_in_order() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.events.lock().extend([
            (
                "req-1".to_string(),
                json!({"method": "POST", "path": "/knn", "body": {"query": [1.0, 2.0, 3.0]}}),
            ),
            ("req-2".to_string(), json!({"unexpected": true})),
        ]);
        let base = spawn_runtime(runtime.clone()).await;
        let client = Client::new();
        let handler = handler().await;

        handle_next(&client, &base, &handler).await.unwrap();
        handle_next(&client, &base, &handler).await.unwrap();

        let replies = runtime.replies.lock();
        assert_eq!(replies[0].0, "req-1");
        assert_eq!(replies[0].1.status, 200);
        assert_eq!(replies[0].1.body["searchResult"]["neighbors"], json!([1]));
        assert_eq!(replies[1].0, "req-2");
        assert_eq!(replies[1].1.status, 400);
    }

    #[tokio::test]
    async fn test_runtime_errors_stop_the_loop() {
        let base = spawn_runtime(Arc::new(FakeRuntime::default())).await;
        let err = handle_next(&Client::new(), &base, &handler().await).await;
        assert!(err.is_err());
    }
}
