//! Core library for Sentinel.  This module wires together the request
//! pipeline (risk classification, gated model invocation, telemetry) and
//! the HTTP front door.  All collaborators are explicitly constructed and
//! injected; there is no process-global client state.

mod config;
pub mod classifier;
pub mod invoker;
pub mod pipeline;
pub mod provider;
pub mod telemetry;
pub mod util;

pub use config::{AppConfig, RotationConfig};

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::classifier::RiskClassifier;
use crate::invoker::RetryingInvoker;
use crate::pipeline::{Pipeline, ReplyStatus};
use crate::provider::GeminiClient;
use crate::telemetry::{JsonLogSink, LogSink, MetricsSink, RotatingWriter, StatsdSink, TelemetryRecorder};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub trace_id: String,
    pub model: String,
}

/// Body of the 403 returned for a policy block.  The trace id lets support
/// staff correlate the refusal with its telemetry record.
#[derive(Debug, Serialize)]
pub struct BlockedResponse {
    pub message: String,
    pub trace_id: String,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Maximum accepted raw request body size in bytes (None => unlimited)
    pub max_request_bytes: Option<usize>,
}

/// Build state from environment variables.  Fails fast when the provider
/// credential is missing; a missing log file or metrics endpoint only
/// disables that sink with a warning.
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    Ok(build_state(config))
}

pub fn build_state(config: AppConfig) -> AppState {
    let classifier = RiskClassifier::new(config.rules.clone());

    let provider = Arc::new(GeminiClient::new(
        config.model_id.clone(),
        config.api_key.clone(),
    ));
    let invoker = RetryingInvoker::new(provider, config.retry_policy());

    let metrics: Option<Arc<dyn MetricsSink>> = config
        .statsd_addr
        .as_ref()
        .map(|addr| Arc::new(StatsdSink::new(addr.clone())) as Arc<dyn MetricsSink>);

    let log: Option<Arc<dyn LogSink>> = match config.log_file.as_deref() {
        Some(path) => {
            match RotatingWriter::open(
                path,
                config.rotation.max_bytes,
                config.rotation.keep,
                config.rotation.compress,
            ) {
                Ok(writer) => Some(Arc::new(JsonLogSink::new(writer)) as Arc<dyn LogSink>),
                Err(e) => {
                    tracing::warn!(path=%path, error=%e, "Failed to open LOG_FILE; telemetry log disabled");
                    None
                }
            }
        }
        None => None,
    };

    let recorder = TelemetryRecorder::new(metrics, log);
    let pipeline = Pipeline::new(classifier, invoker, recorder, config.model_id.clone());

    AppState {
        pipeline: Arc::new(pipeline),
        max_request_bytes: config.max_request_bytes,
    }
}

/// Build the Axum router and attach handlers.  The router holds a copy of
/// the `AppState` for each invocation.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/chat", post(chat_handler))
        .route("/support", post(support_handler))
        .route("/health", get(health_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

async fn chat_handler(
    state: State<AppState>,
    Json(req): Json<ChatRequest>,
) -> axum::response::Response {
    respond(&state, &req.prompt, false).await
}

/// Dedicated support-bot endpoint; identical contract, support persona.
async fn support_handler(
    state: State<AppState>,
    Json(req): Json<ChatRequest>,
) -> axum::response::Response {
    respond(&state, &req.prompt, true).await
}

async fn respond(state: &AppState, prompt: &str, support_mode: bool) -> axum::response::Response {
    let reply = state.pipeline.handle(prompt, support_mode).await;
    match reply.status {
        ReplyStatus::Blocked => (
            StatusCode::FORBIDDEN,
            Json(BlockedResponse {
                message: reply.text,
                trace_id: reply.trace_id,
            }),
        )
            .into_response(),
        ReplyStatus::Served | ReplyStatus::Failed => (
            StatusCode::OK,
            Json(ChatResponse {
                response: reply.text,
                trace_id: reply.trace_id,
                model: reply.usage.model_id,
            }),
        )
            .into_response(),
    }
}

/// Simple health endpoint for container readiness / liveness checks.
async fn health_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "Sentinel Active",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.pipeline.model_id(),
    });
    (StatusCode::OK, Json(json)).into_response()
}
