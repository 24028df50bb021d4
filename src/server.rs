use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::proxy::{self, Upstream};
use crate::translate::openai_types::ChatErrorResponse;
use crate::translate::streaming::StreamFrame;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub upstream: Upstream,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/v1/usage", get(handle_usage))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ChatErrorResponse::from(&self))).into_response()
    }
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req = match proxy::parse_request(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected request");
            return e.into_response();
        }
    };

    let is_streaming = req.stream.unwrap_or(false);

    tracing::debug!(
        model = %req.model,
        stream = is_streaming,
        messages = req.messages.len(),
        "Request"
    );

    if !is_streaming {
        return match proxy::complete(&req, &state.upstream).await {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => {
                tracing::error!(model = %req.model, error = %e, "Completion failed");
                e.into_response()
            }
        };
    }

    let frames = match proxy::stream(&req, &state.upstream).await {
        Ok(frames) => frames,
        Err(e) => {
            tracing::error!(model = %req.model, error = %e, "Streaming setup failed");
            return e.into_response();
        }
    };

    // A mid-stream failure has no status code left to use; the client sees the
    // stream end without the [DONE] sentinel.
    let events = frames.filter_map(|frame| async move {
        match frame {
            Ok(StreamFrame::Chunk(chunk)) => match serde_json::to_string(&chunk) {
                Ok(json) => Some(Ok::<_, Infallible>(Event::default().data(json))),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize chunk");
                    None
                }
            },
            Ok(StreamFrame::Done { .. }) => Some(Ok(Event::default().data("[DONE]"))),
            Err(_) => None,
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "region": state.config.aws.region,
        "models": state.upstream.registry.len(),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let registry = &state.upstream.registry;
    let models: Vec<serde_json::Value> = registry
        .model_names()
        .into_iter()
        .filter_map(|name| {
            let route = registry.resolve(name).ok()?;
            Some(serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": route.vendor.to_string(),
            }))
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

#[derive(Debug, Deserialize)]
struct UsageQuery {
    limit: Option<usize>,
}

async fn handle_usage(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UsageQuery>,
) -> Json<serde_json::Value> {
    let entries = state.upstream.logger.recent(query.limit.unwrap_or(100));
    Json(serde_json::json!({ "data": entries, "object": "list" }))
}
