// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `log` node: emits the message at a configurable level and always
//! succeeds.

use async_trait::async_trait;
use rcr_core::{Msg, RuleError};
use rcr_registry::{Node, RuleContext};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
struct LogConfig {
    #[serde(default = "default_level")]
    level: String,
}

/// Logs every message it sees via `tracing`, then tells `Success`.
#[derive(Default)]
pub struct LogNode {
    config: Option<LogConfig>,
}

#[async_trait]
impl Node for LogNode {
    fn type_name(&self) -> &'static str {
        "log"
    }

    fn init(&mut self, config: Value) -> Result<(), RuleError> {
        let parsed: LogConfig = if config.is_null() {
            LogConfig { level: default_level() }
        } else {
            serde_json::from_value(config).map_err(|e| RuleError::Config(e.to_string()))?
        };
        self.config = Some(parsed);
        Ok(())
    }

    async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: Msg) {
        let level = self.config.as_ref().map_or("info", |c| c.level.as_str());
        let data = msg.get_data().unwrap_or_default();
        match level {
            "trace" => tracing::trace!(chain = %ctx.chain_id(), node = %ctx.self_id(), %data, "log node"),
            "debug" => tracing::debug!(chain = %ctx.chain_id(), node = %ctx.self_id(), %data, "log node"),
            "warn" => tracing::warn!(chain = %ctx.chain_id(), node = %ctx.self_id(), %data, "log node"),
            "error" => tracing::error!(chain = %ctx.chain_id(), node = %ctx.self_id(), %data, "log node"),
            _ => tracing::info!(chain = %ctx.chain_id(), node = %ctx.self_id(), %data, "log node"),
        }
        ctx.tell_success(msg).await;
    }
}
