// SPDX-License-Identifier: MIT OR Apache-2.0

//! Snapshot coverage for the admin HTTP surface's JSON response bodies.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use insta::assert_json_snapshot;
use rcr_core::RuleError;
use rcr_daemon::{build_app, AppState};
use rcr_registry::{ComponentRegistry, Node, RuleContext};
use rcr_runtime::Runtime;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

struct Echo;

#[async_trait::async_trait]
impl Node for Echo {
    fn type_name(&self) -> &'static str {
        "echo"
    }
    fn init(&mut self, _config: serde_json::Value) -> Result<(), RuleError> {
        Ok(())
    }
    async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: rcr_core::Msg) {
        ctx.tell_success(msg).await;
    }
}

fn test_state() -> Arc<AppState> {
    let registry = Arc::new(ComponentRegistry::new());
    registry.register("echo", || Box::new(Echo)).unwrap();
    Arc::new(AppState::new(Arc::new(Runtime::new(registry, HashMap::new(), 60))))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn chain_debug_view_snapshots_the_recorded_events() {
    let app = build_app(test_state());
    let chain = json!({
        "ruleChain": {"id": "c1", "name": "c1", "root": true},
        "metadata": {
            "nodes": [{"id": "a", "type": "echo", "configuration": {}}],
            "connections": [],
        }
    });
    let body = serde_json::to_vec(&chain).unwrap();
    let response = app
        .clone()
        .oneshot(Request::post("/chains").header("content-type", "application/json").body(Body::from(body)).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(Request::post("/messages/c1").body(Body::from(br#"{"temp":42}"#.to_vec())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(Request::get("/chains/c1/debug").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let events = body_json(response).await;
    assert_json_snapshot!(events, @r#"
    [
      {
        "direction": "in",
        "node_id": "a",
        "data": "{\"temp\":42}",
        "relation": null,
        "error": null
      },
      {
        "direction": "out",
        "node_id": "a",
        "data": "{\"temp\":42}",
        "relation": "Success",
        "error": null
      }
    ]
    "#);
}
