//! Lambda invoker for instances created by `LambdaProvisioner`
//!
//! The envelope is the invoke payload and the function answers with an
//! envelope response, so no HTTP front door is needed.

use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use axum::http::StatusCode;
use std::sync::Arc;

use super::{InstanceInvoker, InstanceRef};
use crate::deployer::lambda::LambdaClients;
use crate::error::{KnnError, Result};
use crate::handler::{Envelope, EnvelopeResponse};

pub struct LambdaInvoker {
    clients: Arc<LambdaClients>,
}

impl LambdaInvoker {
    pub fn new(clients: Arc<LambdaClients>) -> Self {
        Self { clients }
    }
}

/// Turn an invoke result into an envelope response. An unhandled function
/// error is a 502 so the caller falls back to the next instance.
fn decode_invoke_output(
    instance: &InstanceRef,
    function_error: Option<&str>,
    payload: Option<&[u8]>,
) -> Result<EnvelopeResponse> {
    if let Some(kind) = function_error {
        let detail = payload.map(String::from_utf8_lossy).unwrap_or_default();
        return Ok(EnvelopeResponse::error(
            StatusCode::BAD_GATEWAY,
            format!("{} raised {}: {}", instance, kind, detail),
        ));
    }

    let payload = payload
        .ok_or_else(|| KnnError::invocation(format!("{} returned no payload", instance)))?;
    serde_json::from_slice(payload).map_err(|e| {
        KnnError::invocation(format!("{} returned a malformed response: {}", instance, e))
    })
}

#[async_trait]
impl InstanceInvoker for LambdaInvoker {
    async fn invoke(&self, instance: &InstanceRef, request: Envelope) -> Result<EnvelopeResponse> {
        let client = self.clients.client(&instance.region)?;
        let payload =
            serde_json::to_vec(&request).map_err(|e| KnnError::invocation(e.to_string()))?;

        let output = client
            .invoke()
            .function_name(&instance.name)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| {
                KnnError::invocation(format!("{}: {}", instance, e.into_service_error()))
            })?;

        decode_invoke_output(
            instance,
            output.function_error(),
            output.payload().map(|blob| blob.as_ref()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance() -> InstanceRef {
        InstanceRef::new("db-c-m0", "us-east-1")
    }

    #[test]
    fn test_decode_envelope_response() {
        let body = json!({"status": 200, "body": {"instanceId": "db-c-m0"}});
        let payload = serde_json::to_vec(&body).unwrap();

        let response = decode_invoke_output(&instance(), None, Some(&payload)).unwrap();
        assert!(response.is_success());
        assert_eq!(response.body["instanceId"], "db-c-m0");
    }

    #[test]
    fn test_function_error_counts_as_server_error() {
        let payload = br#"{"errorMessage":"Task timed out"}"#;
        let response =
            decode_invoke_output(&instance(), Some("Unhandled"), Some(payload)).unwrap();
        assert_eq!(response.status, 502);
    }

    #[test]
    fn test_missing_or_garbage_payload_is_an_error() {
        assert!(matches!(
            decode_invoke_output(&instance(), None, None),
            Err(KnnError::Invocation(_))
        ));
        assert!(matches!(
            decode_invoke_output(&instance(), None, Some(b"not json")),
            Err(KnnError::Invocation(_))
        ));
    }
}
