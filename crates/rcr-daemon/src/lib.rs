// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Admin HTTP surface: load/list/unload chains, inspect a chain's debug
//! ring, and inject a message directly (bypassing any bound endpoint) for
//! testing and scripted operation.

use axum::extract::{Path as AxPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rcr_core::{ErrorCategory, RuleChainDsl, RuleError};
use rcr_runtime::{DebugEvent, FlowDirection, Runtime};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Shared state behind every admin route.
#[derive(Clone)]
pub struct AppState {
    /// The live rule-chain runtime this daemon hosts.
    pub runtime: Arc<Runtime>,
    /// When this state was constructed, used to report uptime on `/health`.
    pub started_at: std::time::Instant,
}

impl AppState {
    /// Build admin state around a runtime, stamping the current time as the
    /// process start for uptime reporting.
    #[must_use]
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime, started_at: std::time::Instant::now() }
    }
}

/// An error response: `{"error": "..."}"` with a status mapped from the
/// underlying [`RuleError`]'s category.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn from_rule_error(err: RuleError) -> Self {
        let status = match err.category() {
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Config | ErrorCategory::InvalidJson | ErrorCategory::Duplicate => StatusCode::BAD_REQUEST,
            ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCategory::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Transport | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Build the admin router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/chains", get(cmd_list_chains).post(cmd_load_chain))
        .route("/chains/{id}", delete(cmd_unload_chain))
        .route("/chains/{id}/debug", get(cmd_chain_debug))
        .route("/messages/{chain_id}", post(cmd_inject_message))
        .with_state(state)
}

async fn cmd_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn cmd_list_chains(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.runtime.list_chains().await)
}

async fn cmd_load_chain(
    State(state): State<Arc<AppState>>,
    Json(dsl): Json<RuleChainDsl>,
) -> Result<impl IntoResponse, ApiError> {
    let id = dsl.rule_chain.id.clone();
    state.runtime.load_chain(&dsl).await.map_err(ApiError::from_rule_error)?;
    info!(chain = %id, "chain loaded");
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn cmd_unload_chain(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.runtime.unload_chain(&id).await {
        info!(chain = %id, "chain unloaded");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, format!("chain not found: {id}")))
    }
}

#[derive(Serialize)]
struct DebugEventView {
    direction: &'static str,
    node_id: String,
    data: Option<String>,
    relation: Option<String>,
    error: Option<String>,
}

impl From<DebugEvent> for DebugEventView {
    fn from(event: DebugEvent) -> Self {
        Self {
            direction: match event.direction {
                FlowDirection::In => "in",
                FlowDirection::Out => "out",
            },
            node_id: event.node_id,
            data: event.msg.get_data(),
            relation: event.relation,
            error: event.error,
        }
    }
}

async fn cmd_chain_debug(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let chain = state
        .runtime
        .get_chain(&id)
        .await
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("chain not found: {id}")))?;
    let events: Vec<DebugEventView> = chain.debug.snapshot().into_iter().map(DebugEventView::from).collect();
    Ok(Json(events))
}

async fn cmd_inject_message(
    State(state): State<Arc<AppState>>,
    AxPath(chain_id): AxPath<String>,
    body: axum::body::Bytes,
) -> Response {
    let data_type = if serde_json::from_slice::<serde_json::Value>(&body).is_ok() {
        rcr_core::DataType::Json
    } else {
        rcr_core::DataType::Text
    };
    let msg = rcr_core::Msg::new(0, "ADMIN_INJECT", data_type, rcr_core::Metadata::new(), body.to_vec());
    rcr_endpoint::dispatch_and_respond(&state.runtime, &chain_id, msg).await
}
