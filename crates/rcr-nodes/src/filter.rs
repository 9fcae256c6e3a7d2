// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `jsonFilter` node: extracts a field from the message's JSON payload
//! by a dotted path and matches its string form against a glob pattern.

use async_trait::async_trait;
use globset::Glob;
use rcr_core::{Msg, RuleError};
use rcr_registry::{Node, RuleContext};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct JsonFilterConfig {
    /// Dotted path into the JSON payload, e.g. `"metrics.cpu"`.
    key: String,
    /// Glob pattern matched against the field's string form.
    pattern: String,
}

/// Matches a JSON field against a glob pattern and routes `True`/`False`.
#[derive(Default)]
pub struct JsonFilterNode {
    config: Option<JsonFilterConfig>,
}

fn lookup(value: &Value, path: &str) -> Option<Value> {
    let mut cursor = value;
    for segment in path.split('.') {
        cursor = cursor.get(segment)?;
    }
    Some(cursor.clone())
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Node for JsonFilterNode {
    fn type_name(&self) -> &'static str {
        "jsonFilter"
    }

    fn init(&mut self, config: Value) -> Result<(), RuleError> {
        let parsed: JsonFilterConfig =
            serde_json::from_value(config).map_err(|e| RuleError::Config(e.to_string()))?;
        Glob::new(&parsed.pattern).map_err(|e| RuleError::Config(e.to_string()))?;
        self.config = Some(parsed);
        Ok(())
    }

    async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: Msg) {
        let config = self.config.as_ref().expect("jsonFilter node used before init");

        let json = match msg.get_json() {
            Ok(json) => json,
            Err(err) => {
                ctx.tell_failure(msg, err).await;
                return;
            }
        };

        let matched = lookup(&json, &config.key)
            .map(|field| stringify(&field))
            .is_some_and(|text| {
                Glob::new(&config.pattern)
                    .map(|g| g.compile_matcher().is_match(text))
                    .unwrap_or(false)
            });

        let relation = if matched { "True" } else { "False" };
        ctx.tell_next_or_else(msg, "False".to_string(), vec![relation.to_string()]).await;
    }
}
