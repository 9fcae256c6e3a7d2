// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `flow` node: hands the message off to another chain by id and ends
//! this branch.

use async_trait::async_trait;
use rcr_core::{render_template, Msg, RuleError};
use rcr_registry::{Node, RuleContext};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct FlowConfig {
    #[serde(rename = "targetChainId")]
    target_chain_id: String,
}

/// Delegates the message to another chain via [`RuleContext::tell_flow`].
/// The target chain id may reference `${metadata.*}`/`${msg.*}` templates,
/// resolved per-message.
#[derive(Default)]
pub struct FlowNode {
    config: Option<FlowConfig>,
}

#[async_trait]
impl Node for FlowNode {
    fn type_name(&self) -> &'static str {
        "flow"
    }

    fn init(&mut self, config: Value) -> Result<(), RuleError> {
        let parsed: FlowConfig =
            serde_json::from_value(config).map_err(|e| RuleError::Config(e.to_string()))?;
        self.config = Some(parsed);
        Ok(())
    }

    async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: Msg) {
        let config = self.config.as_ref().expect("flow node used before init");
        let chain_id = render_template(&config.target_chain_id, |ns, key| match ns {
            "metadata" => msg.metadata().get_value(key),
            "msg" => msg.get_json().ok().and_then(|v| v.get(key).map(|f| f.to_string())),
            _ => None,
        });
        ctx.tell_flow(chain_id, msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcr_cancel::CancellationToken;
    use rcr_core::{DataType, Metadata};
    use rcr_registry::ChildOutcome;
    use std::sync::Mutex;

    struct RecordingContext {
        cancel: CancellationToken,
        flowed_to: Mutex<Option<String>>,
    }

    #[async_trait]
    impl RuleContext for RecordingContext {
        fn self_id(&self) -> &str {
            "n1"
        }
        fn chain_id(&self) -> &str {
            "c1"
        }
        fn cancellation_token(&self) -> &CancellationToken {
            &self.cancel
        }
        async fn tell_success(&self, _msg: Msg) {}
        async fn tell_failure(&self, _msg: Msg, _err: RuleError) {}
        async fn tell_next(&self, _msg: Msg, _relations: Vec<String>) {}
        async fn tell_next_or_else(&self, _msg: Msg, _default_relation: String, _relations: Vec<String>) {}
        async fn tell_self(&self, _msg: Msg, _delay_ms: u64) {}
        async fn tell_flow(&self, chain_id: String, _msg: Msg) {
            *self.flowed_to.lock().unwrap() = Some(chain_id);
        }
        async fn tell_node(&self, _node_id: &str, msg: Msg) -> ChildOutcome {
            ChildOutcome { relation: "Success".into(), msg, err: None }
        }
    }

    #[tokio::test]
    async fn delegates_to_static_chain_id() {
        let mut node = FlowNode::default();
        node.init(serde_json::json!({"targetChainId": "downstream"})).unwrap();
        let ctx = Arc::new(RecordingContext { cancel: CancellationToken::new(), flowed_to: Mutex::new(None) });
        let msg = Msg::new(0, "T", DataType::Text, Metadata::new(), b"x".to_vec());
        node.on_msg(ctx.clone(), msg).await;
        assert_eq!(ctx.flowed_to.lock().unwrap().as_deref(), Some("downstream"));
    }

    #[tokio::test]
    async fn resolves_metadata_template_in_target() {
        let mut node = FlowNode::default();
        node.init(serde_json::json!({"targetChainId": "${metadata.tenant}-chain"})).unwrap();
        let ctx = Arc::new(RecordingContext { cancel: CancellationToken::new(), flowed_to: Mutex::new(None) });
        let mut msg = Msg::new(0, "T", DataType::Text, Metadata::new(), b"x".to_vec());
        msg.metadata_mut().put_value("tenant", "acme");
        node.on_msg(ctx.clone(), msg).await;
        assert_eq!(ctx.flowed_to.lock().unwrap().as_deref(), Some("acme-chain"));
    }
}
