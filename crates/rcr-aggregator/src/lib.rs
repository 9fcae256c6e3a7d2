// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The group-action node: runs a declared set of child node ids in
//! parallel, waits for a match quorum or a timeout, and emits one
//! deterministic outcome with the completed children's results in
//! declaration order.

use async_trait::async_trait;
use futures::future::Either;
use rcr_core::{DataType, Metadata, Msg, RuleError, StringOrList};
use rcr_registry::{ChildOutcome, Node, RuleContext};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

fn default_match_relation() -> String {
    "Success".to_string()
}

#[derive(Debug, Deserialize)]
struct GroupActionConfig {
    #[serde(rename = "nodeIds")]
    node_ids: StringOrList,
    #[serde(rename = "matchRelationType", default = "default_match_relation")]
    match_relation_type: String,
    #[serde(rename = "matchNum", default)]
    match_num: usize,
    #[serde(default)]
    timeout: u64,
}

/// The `groupAction` node type: fan out to child node ids, aggregate by
/// quorum, and emit a single ordered JSON array of the results.
#[derive(Default)]
pub struct GroupActionNode {
    config: Option<GroupActionConfig>,
}

impl GroupActionNode {
    fn config(&self) -> &GroupActionConfig {
        self.config.as_ref().expect("groupAction node used before init")
    }
}

#[async_trait]
impl Node for GroupActionNode {
    fn type_name(&self) -> &'static str {
        "groupAction"
    }

    fn init(&mut self, config: Value) -> Result<(), RuleError> {
        let parsed: GroupActionConfig =
            serde_json::from_value(config).map_err(|e| RuleError::Config(e.to_string()))?;
        self.config = Some(parsed);
        Ok(())
    }

    async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: Msg) {
        let config = self.config();
        let node_ids = config.node_ids.0.clone();

        if node_ids.is_empty() {
            ctx.tell_failure(msg, RuleError::Config("groupAction: nodeIds is empty".into())).await;
            return;
        }

        let match_num = if config.match_num == 0 { node_ids.len() } else { config.match_num };
        let match_relation = config.match_relation_type.clone();
        let cancel = ctx.cancellation_token().child();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(usize, ChildOutcome)>();
        for (idx, node_id) in node_ids.iter().cloned().enumerate() {
            let ctx = ctx.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            let child_msg = msg.copy();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    outcome = ctx.tell_node(&node_id, child_msg) => {
                        let _ = tx.send((idx, outcome));
                    }
                }
            });
        }
        drop(tx);

        let timeout_fut = if config.timeout > 0 {
            Either::Left(tokio::time::sleep(Duration::from_secs(config.timeout)))
        } else {
            Either::Right(std::future::pending())
        };
        tokio::pin!(timeout_fut);

        let mut slots: Vec<Option<ChildOutcome>> =
            std::iter::repeat_with(|| None).take(node_ids.len()).collect();
        let mut matched = 0usize;
        let mut completed = 0usize;
        let mut quorum_met = false;
        let mut timed_out = false;

        loop {
            tokio::select! {
                biased;
                () = &mut timeout_fut => {
                    timed_out = true;
                    break;
                }
                received = rx.recv() => {
                    let Some((idx, outcome)) = received else {
                        break;
                    };
                    completed += 1;
                    if outcome.relation == match_relation {
                        matched += 1;
                    }
                    slots[idx] = Some(outcome);
                    if matched >= match_num {
                        quorum_met = true;
                        break;
                    }
                    if completed == node_ids.len() {
                        break;
                    }
                }
            }
        }
        // Once we've broken out of the loop every outcome this call still
        // needs has either arrived or never will; the reason only needs to
        // distinguish "quorum already satisfied" from "gave up waiting".
        let reason = if timed_out {
            rcr_cancel::CancellationReason::AggregatorTimeout
        } else {
            rcr_cancel::CancellationReason::AggregatorQuorumMet
        };
        cancel.cancel(reason);

        let mut entries = Vec::with_capacity(node_ids.len());
        let mut out_metadata = Metadata::new();
        for (idx, slot) in slots.into_iter().enumerate() {
            let Some(outcome) = slot else { continue };
            out_metadata.replace_all(outcome.msg.metadata().to_map());
            entries.push(serde_json::json!({
                "nodeId": node_ids[idx],
                "data": outcome.msg.get_data(),
                "metadata": outcome.msg.metadata().to_map(),
                "error": outcome.err.as_ref().map(ToString::to_string),
            }));
        }
        let body = serde_json::to_vec(&Value::Array(entries)).unwrap_or_default();
        let out_msg = Msg::new(0, msg.msg_type(), DataType::Json, out_metadata, body);

        if quorum_met {
            ctx.tell_success(out_msg).await;
        } else {
            let err = if timed_out {
                RuleError::Timeout("groupAction: quorum not met before timeout".into())
            } else {
                RuleError::Config("groupAction: quorum not met".into())
            };
            ctx.tell_failure(out_msg, err).await;
        }
    }
}
