//! Webhook HTTP Server
//!
//! Thin axum shell over [`WebhookPipeline`]. Bodies are taken as raw bytes so
//! that payloads which are not valid JSON still reach the audit log before
//! being rejected. JSON and URL-encoded form bodies are both accepted.
//!
//! Each instruction runs on its own task: a client that disconnects does not
//! cancel a worker that is already placing an order.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::application::{PipelineError, WebhookPipeline};
use crate::domain::{DispatchReport, StatusReport};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<WebhookPipeline>,
    /// Held for the whole pipeline run; one instruction executes at a time
    gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(pipeline: WebhookPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn pipeline(&self) -> &WebhookPipeline {
        &self.pipeline
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/webhook", post(webhook))
        .with_state(state)
}

/// Bind and serve until Ctrl+C
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let mode = state.pipeline().mode();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Webhook server listening on {} ({})", listener.local_addr()?, mode);
    tracing::info!("POST instructions to http://{}/webhook", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
}

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A request body as audited and as parsed
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookBody {
    /// Recorded in the request log
    pub raw: Value,
    /// Handed to instruction parsing
    pub payload: Value,
}

/// Decode a request body. Form bodies become an object of string fields;
/// anything that is neither JSON nor a form is kept as a string payload.
pub fn decode_body(content_type: Option<&str>, body: &[u8]) -> WebhookBody {
    let text = || Value::String(String::from_utf8_lossy(body).into_owned());

    let is_form = content_type
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE))
        .unwrap_or(false);

    if is_form {
        let payload = match serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            Ok(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect::<Map<String, Value>>(),
            ),
            Err(e) => {
                tracing::warn!("Undecodable form body: {}", e);
                text()
            }
        };
        return WebhookBody {
            raw: text(),
            payload,
        };
    }

    let payload = serde_json::from_slice::<Value>(body).unwrap_or_else(|_| text());
    WebhookBody {
        raw: payload.clone(),
        payload,
    }
}

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DispatchReport>, PipelineError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let body = decode_body(content_type, &body);

    // Detached from the connection; runs to completion and records its
    // outcome even if the handler future is dropped.
    let task = tokio::spawn(async move {
        let _guard = state.gate.lock().await;
        state.pipeline.handle_decoded(&body.raw, &body.payload).await
    });

    match task.await {
        Ok(result) => result.map(Json),
        Err(e) => {
            tracing::error!("Webhook task failed: {}", e);
            Err(PipelineError::TaskFailed(e.to_string()))
        }
    }
}

pub async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.pipeline.status())
}

pub async fn root(State(state): State<AppState>) -> String {
    format!(
        "Buy relay webhook server is running ({})",
        state.pipeline.mode().description()
    )
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let timestamp = Utc::now();

        match self {
            PipelineError::MalformedInstruction(e) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "message": "Missing or invalid parameters: profit, level or tokenId",
                    "reason": e.to_string(),
                    "field": e.field(),
                    "timestamp": timestamp,
                })),
            )
                .into_response(),
            PipelineError::PolicyRejected { rule, reason } => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "success": false,
                    "message": "Safety check failed",
                    "reason": reason,
                    "rule": rule,
                    "timestamp": timestamp,
                })),
            )
                .into_response(),
            PipelineError::DispatchFailed(failure) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(*failure)).into_response()
            }
            PipelineError::Persistence(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": "Failed to record request, instruction not executed",
                    "error": e.to_string(),
                    "timestamp": timestamp,
                })),
            )
                .into_response(),
            PipelineError::TaskFailed(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": "Request processing failed",
                    "error": e,
                    "timestamp": timestamp,
                })),
            )
                .into_response(),
        }
    }
}
