// SPDX-License-Identifier: MIT OR Apache-2.0

//! The WebSocket endpoint: a GET-only upgrade handler that, once upgraded,
//! reads frames in a loop and dispatches each into the chain bound to the
//! matched router, writing the dispatch outcome back as a frame of the same
//! type it received.
//!
//! Path params and the URL query are copied into the message's metadata
//! alongside a `messageType` key (`"1"` text / `"2"` binary), and a disabled
//! or since-removed router causes the connection to close rather than
//! silently hang.

use crate::exchange::ws_frame_to_msg;
use crate::router::RouterTable;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router as AxumRouter;
use rcr_core::RuleError;
use rcr_runtime::Runtime;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

/// WebSocket endpoint configuration.
#[derive(Clone, Debug)]
pub struct WebSocketEndpointConfig {
    /// Address to bind the server on, e.g. `"0.0.0.0:6335"`.
    pub listen_addr: String,
    /// Whether to allow cross-origin upgrade requests from any origin.
    pub allow_cors: bool,
}

impl Default for WebSocketEndpointConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:6335".to_string(),
            allow_cors: true,
        }
    }
}

struct WsState {
    routers: Arc<RouterTable>,
    runtime: Arc<Runtime>,
}

/// A running (or not-yet-started) WebSocket endpoint.
pub struct WebSocketEndpoint {
    config: WebSocketEndpointConfig,
    routers: Arc<RouterTable>,
    runtime: Arc<Runtime>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketEndpoint {
    /// Build an endpoint with no routers registered yet.
    #[must_use]
    pub fn new(config: WebSocketEndpointConfig, runtime: Arc<Runtime>) -> Self {
        Self {
            config,
            routers: Arc::new(RouterTable::new()),
            runtime,
            server: Mutex::new(None),
        }
    }

    /// The router table backing this endpoint.
    #[must_use]
    pub fn routers(&self) -> &Arc<RouterTable> {
        &self.routers
    }

    /// Register an upgrade path. Routers are always matched against `GET`,
    /// since an upgrade request is always a `GET`.
    pub fn add_router(&self, id: &str, pattern: &str, chain_id: &str) -> String {
        self.routers.add_router(id, Method::GET, pattern, chain_id)
    }

    /// Soft-disable a previously registered router. Connections already
    /// upgraded against it are closed on their next frame.
    pub fn remove_router(&self, id: &str) -> Result<(), RuleError> {
        self.routers.remove_router(id)
    }

    /// Bind and serve. Idempotent: a second call while already running is a
    /// no-op.
    pub async fn start(&self) -> Result<(), RuleError> {
        let mut guard = self.server.lock().expect("websocket endpoint lock poisoned");
        if guard.is_some() {
            return Ok(());
        }
        let state = Arc::new(WsState { routers: self.routers.clone(), runtime: self.runtime.clone() });
        let mut app = AxumRouter::new().fallback(upgrade_handler).with_state(state);
        if self.config.allow_cors {
            app = app.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
        }
        let listener = TcpListener::bind(&self.config.listen_addr).await.map_err(|e| {
            RuleError::transport_with_cause(format!("bind {} failed", self.config.listen_addr), e)
        })?;
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                tracing::error!(%err, "websocket endpoint server exited");
            }
        });
        *guard = Some(task);
        Ok(())
    }

    /// Stop serving. Already-upgraded connections are dropped along with
    /// the listening task.
    pub fn destroy(&self) {
        if let Some(task) = self.server.lock().expect("websocket endpoint lock poisoned").take() {
            task.abort();
        }
    }
}

async fn upgrade_handler(
    State(state): State<Arc<WsState>>,
    uri: Uri,
    Query(query_params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some((router, path_params)) = state.routers.find(&Method::GET, uri.path()) else {
        return (StatusCode::NOT_FOUND, "no router matches this path").into_response();
    };
    let router_id = router.id().to_string();
    let chain_id = router.chain_id().to_string();
    let path = uri.path().to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, state, router_id, chain_id, path, path_params, query_params))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<WsState>,
    router_id: String,
    chain_id: String,
    from: String,
    path_params: HashMap<String, String>,
    query_params: HashMap<String, String>,
) {
    loop {
        let Some(frame) = socket.recv().await else {
            tracing::debug!(chain = %chain_id, "websocket client disconnected");
            break;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(chain = %chain_id, %err, "websocket read failed, disconnecting");
                break;
            }
        };
        let (is_binary, payload) = match frame {
            WsMessage::Text(text) => (false, text.as_bytes().to_vec()),
            WsMessage::Binary(bytes) => (true, bytes.to_vec()),
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
        };

        match state.routers.get(&router_id) {
            Some(router) if router.is_disabled() => {
                tracing::debug!(chain = %chain_id, "router disabled mid-connection, disconnecting");
                break;
            }
            None => break,
            _ => {}
        }

        let mut msg = ws_frame_to_msg(&from, is_binary, payload, &query_params);
        for (k, v) in &path_params {
            msg.metadata_mut().put_value(k.clone(), v.clone());
        }

        match state.runtime.dispatch(&chain_id, msg).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    if let Some(err) = outcome.err {
                        tracing::warn!(chain = %chain_id, node = %outcome.node_id, %err, "websocket dispatch failed");
                        continue;
                    }
                    let reply = if is_binary {
                        WsMessage::Binary(outcome.msg.get_bytes().into())
                    } else {
                        let text = String::from_utf8_lossy(&outcome.msg.get_bytes()).into_owned();
                        WsMessage::Text(text.into())
                    };
                    if socket.send(reply).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(chain = %chain_id, %err, "websocket dispatch failed");
            }
        }
    }
}
