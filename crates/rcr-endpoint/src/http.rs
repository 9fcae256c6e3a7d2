// SPDX-License-Identifier: MIT OR Apache-2.0

//! The chain-facing HTTP endpoint: one axum server whose single fallback
//! handler dispatches against a [`RouterTable`] that can change after
//! `start()` — routers are matched per request rather than baked into the
//! axum route tree, so `add_router`/`remove_router` take effect immediately
//! for in-flight traffic.

use crate::exchange::InboundRequest;
use crate::router::RouterTable;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router as AxumRouter;
use rcr_core::{ErrorCategory, RuleError};
use rcr_runtime::{DispatchOutcome, Runtime};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

/// Chain-facing HTTP endpoint configuration.
#[derive(Clone, Debug)]
pub struct HttpEndpointConfig {
    /// Address to bind the server on, e.g. `"0.0.0.0:6334"`.
    pub listen_addr: String,
    /// Whether to allow cross-origin requests from any origin.
    pub allow_cors: bool,
}

impl Default for HttpEndpointConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:6334".to_string(),
            allow_cors: true,
        }
    }
}

struct HttpState {
    routers: Arc<RouterTable>,
    runtime: Arc<Runtime>,
}

/// A running (or not-yet-started) chain-facing HTTP endpoint.
pub struct HttpEndpoint {
    config: HttpEndpointConfig,
    routers: Arc<RouterTable>,
    runtime: Arc<Runtime>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl HttpEndpoint {
    /// Build an endpoint with no routers registered yet.
    #[must_use]
    pub fn new(config: HttpEndpointConfig, runtime: Arc<Runtime>) -> Self {
        Self {
            config,
            routers: Arc::new(RouterTable::new()),
            runtime,
            server: Mutex::new(None),
        }
    }

    /// The router table backing this endpoint, shared with any endpoint
    /// built on top of it (e.g. [`crate::websocket::WebSocketEndpoint`]).
    #[must_use]
    pub fn routers(&self) -> &Arc<RouterTable> {
        &self.routers
    }

    /// Register `pattern` (with `:name` captures) under `method`, feeding
    /// `chain_id`. Safe to call before or after `start()`.
    pub fn add_router(&self, id: &str, method: Method, pattern: &str, chain_id: &str) -> String {
        self.routers.add_router(id, method, pattern, chain_id)
    }

    /// Soft-disable a previously registered router.
    pub fn remove_router(&self, id: &str) -> Result<(), RuleError> {
        self.routers.remove_router(id)
    }

    /// Bind and serve. Idempotent: a second call while already running is a
    /// no-op.
    pub async fn start(&self) -> Result<(), RuleError> {
        let mut guard = self.server.lock().expect("http endpoint lock poisoned");
        if guard.is_some() {
            return Ok(());
        }
        let state = Arc::new(HttpState { routers: self.routers.clone(), runtime: self.runtime.clone() });
        let mut app = AxumRouter::new().fallback(handle_request).with_state(state);
        if self.config.allow_cors {
            app = app.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
        }
        let listener = TcpListener::bind(&self.config.listen_addr).await.map_err(|e| {
            RuleError::transport_with_cause(format!("bind {} failed", self.config.listen_addr), e)
        })?;
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                tracing::error!(%err, "http endpoint server exited");
            }
        });
        *guard = Some(task);
        Ok(())
    }

    /// Stop serving. The router table and its registrations are preserved;
    /// a subsequent `start()` serves the same routers again.
    pub fn destroy(&self) {
        if let Some(task) = self.server.lock().expect("http endpoint lock poisoned").take() {
            task.abort();
        }
    }
}

async fn handle_request(
    State(state): State<Arc<HttpState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some((router, path_params)) = state.routers.find(&method, uri.path()) else {
        return (StatusCode::NOT_FOUND, "no router matches this request").into_response();
    };
    let header_map = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_lowercase(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    let request = InboundRequest {
        headers: header_map,
        path_params,
        query_params: query,
        body: body.to_vec(),
    };
    let msg = request.into_msg(&format!("{method} {}", uri.path()));
    dispatch_and_respond(&state.runtime, router.chain_id(), msg).await
}

/// Dispatch `msg` into `chain_id` and translate the result into an HTTP
/// response. Shared by the chain-facing endpoint and the admin message
/// injection route.
pub async fn dispatch_and_respond(runtime: &Runtime, chain_id: &str, msg: rcr_core::Msg) -> Response {
    match runtime.dispatch(chain_id, msg).await {
        Ok(outcomes) => outcomes_to_response(outcomes),
        Err(err) => error_to_response(&err),
    }
}

fn outcomes_to_response(outcomes: Vec<DispatchOutcome>) -> Response {
    let Some(outcome) = outcomes.into_iter().next() else {
        // No leaf outcome at all: every root node either has no Tell* path
        // left dangling, or the chain is a pure fan-out with no dead ends.
        return StatusCode::ACCEPTED.into_response();
    };
    if let Some(err) = &outcome.err {
        return error_to_response(err);
    }
    (StatusCode::OK, outcome.msg.get_bytes()).into_response()
}

/// Map a [`RuleError`] to an HTTP status per the error taxonomy:
/// `Config`/`NotFound`/`InvalidJson`/`Duplicate` are 4xx, everything else is
/// 5xx (`Timeout`/`Cancelled` get their own distinguishing codes).
pub fn error_to_response(err: &RuleError) -> Response {
    let status = match err.category() {
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Config | ErrorCategory::InvalidJson | ErrorCategory::Duplicate => StatusCode::BAD_REQUEST,
        ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Transport | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use rcr_core::{ChainMetadata, DataType, Metadata, Msg, NodeDef, RuleChainDsl, RuleChainMeta};
    use rcr_registry::{ComponentRegistry, Node, RuleContext};
    use std::collections::HashMap as Map;

    struct Echo;

    #[async_trait::async_trait]
    impl Node for Echo {
        fn type_name(&self) -> &'static str {
            "echo"
        }
        fn init(&mut self, _config: serde_json::Value) -> Result<(), RuleError> {
            Ok(())
        }
        async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: Msg) {
            ctx.tell_success(msg).await;
        }
    }

    fn runtime_with_echo_chain() -> Arc<Runtime> {
        let registry = Arc::new(ComponentRegistry::new());
        registry.register("echo", || Box::new(Echo)).unwrap();
        let runtime = Arc::new(Runtime::new(registry, Map::new(), 60));
        runtime
    }

    fn dsl(id: &str) -> RuleChainDsl {
        RuleChainDsl {
            rule_chain: RuleChainMeta { id: id.into(), name: id.into(), root: true, additional_info: serde_json::Map::new() },
            metadata: ChainMetadata {
                nodes: vec![NodeDef { id: "a".into(), type_: "echo".into(), name: String::new(), configuration: serde_json::json!({}) }],
                connections: vec![],
                endpoints: vec![],
            },
        }
    }

    #[tokio::test]
    async fn dispatch_and_respond_echoes_body_on_success() {
        let runtime = runtime_with_echo_chain();
        runtime.load_chain(&dsl("c1")).await.unwrap();
        let msg = Msg::new(0, "T", DataType::Text, Metadata::new(), b"ping".to_vec());
        let response = dispatch_and_respond(&runtime, "c1", msg).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn dispatch_and_respond_maps_not_found_to_404() {
        let runtime = runtime_with_echo_chain();
        let msg = Msg::new(0, "T", DataType::Text, Metadata::new(), b"ping".to_vec());
        let response = dispatch_and_respond(&runtime, "missing", msg).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn config_error_maps_to_bad_request() {
        let response = error_to_response(&RuleError::Config("bad".into()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_error_maps_to_server_error() {
        let response = error_to_response(&RuleError::Internal("boom".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn add_and_remove_router_through_endpoint() {
        let runtime = runtime_with_echo_chain();
        let endpoint = HttpEndpoint::new(HttpEndpointConfig::default(), runtime);
        let id = endpoint.add_router("", Method::GET, "/devices/:id", "c1");
        assert!(endpoint.routers().find(&Method::GET, "/devices/1").is_some());
        endpoint.remove_router(&id).unwrap();
        assert!(endpoint.routers().find(&Method::GET, "/devices/1").is_none());
    }
}
