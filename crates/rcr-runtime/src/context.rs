// SPDX-License-Identifier: MIT OR Apache-2.0

//! The [`RuleContext`] implementations and the per-dispatch bookkeeping that
//! drives a compiled chain from a root message to quiescence.
//!
//! A chain dispatch fans out along declared edges; [`DispatchState`] tracks
//! how many node executions are still in flight so the driving
//! [`crate::runtime::Runtime::dispatch`] call can resolve exactly once, after
//! every branch has told a terminal outcome. A direct
//! [`RuleContext::tell_node`] invocation (used by the group-action
//! aggregator) is deliberately kept off that counter: it captures one node's
//! single terminal call through [`CaptureContext`] without walking any edges
//! the node might otherwise have.

use crate::compile::CompiledChain;
use crate::runtime::RuntimeHandle;
use async_trait::async_trait;
use rcr_cancel::CancellationToken;
use rcr_core::{Msg, RuleError};
use rcr_registry::{ChildOutcome, RuleContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// A single leaf outcome recorded by a chain dispatch: a node told a
/// terminal result with no outgoing edge to carry it further.
pub struct DispatchOutcome {
    /// The node that produced this outcome.
    pub node_id: String,
    /// The relation it told.
    pub relation: String,
    /// The message at that point.
    pub msg: Msg,
    /// Set if the terminal call was `tell_failure`.
    pub err: Option<RuleError>,
}

pub(crate) struct DispatchState {
    pending: AtomicUsize,
    outcomes: Mutex<Vec<DispatchOutcome>>,
    done: Mutex<Option<oneshot::Sender<()>>>,
}

impl DispatchState {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                pending: AtomicUsize::new(0),
                outcomes: Mutex::new(Vec::new()),
                done: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    pub(crate) fn enter(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_leaf(&self, outcome: DispatchOutcome) {
        self.outcomes.lock().expect("dispatch outcomes lock poisoned").push(outcome);
    }

    /// Mark one node execution as finished. The last caller to return `true`
    /// signals the driving `dispatch` call.
    pub(crate) fn leave(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(tx) = self.done.lock().expect("dispatch done lock poisoned").take() {
                let _ = tx.send(());
            }
        }
    }

    pub(crate) fn take_outcomes(&self) -> Vec<DispatchOutcome> {
        std::mem::take(&mut self.outcomes.lock().expect("dispatch outcomes lock poisoned"))
    }
}

/// Run `node_id` within `chain`, starting a fresh dispatch rooted at that
/// node. `state` tracks the fan-out this call (and everything it spawns)
/// contributes to; the caller must have already called `state.enter()` for
/// this invocation.
pub(crate) fn spawn_node(
    chain: Arc<CompiledChain>,
    node_id: String,
    msg: Msg,
    state: Arc<DispatchState>,
    cancel: CancellationToken,
    handle: RuntimeHandle,
) {
    tokio::spawn(async move {
        if cancel.is_cancelled() {
            state.leave();
            return;
        }
        let Some(node) = chain.nodes.get(&node_id).cloned() else {
            tracing::warn!(chain = %chain.id, node = %node_id, "dispatch target vanished");
            state.leave();
            return;
        };
        chain.debug.record_in(&chain.id, &node_id, &msg);
        let ctx: Arc<dyn RuleContext> = Arc::new(DispatchContext {
            node_id,
            chain,
            state,
            cancel,
            handle,
        });
        node.on_msg(ctx, msg).await;
    });
}

struct DispatchContext {
    node_id: String,
    chain: Arc<CompiledChain>,
    state: Arc<DispatchState>,
    cancel: CancellationToken,
    handle: RuntimeHandle,
}

impl DispatchContext {
    fn route(&self, msg: Msg, relations: Vec<String>, err: Option<RuleError>) {
        let mut dispatched_any = false;
        let mut seen = std::collections::HashSet::new();
        for relation in &relations {
            for target in self.chain.targets(&self.node_id, relation) {
                if !seen.insert(target.clone()) {
                    continue;
                }
                dispatched_any = true;
                self.state.enter();
                spawn_node(
                    self.chain.clone(),
                    target,
                    msg.copy(),
                    self.state.clone(),
                    self.cancel.clone(),
                    self.handle.clone(),
                );
            }
        }
        let joined_relation = relations.join("+");
        self.chain.debug.record_out(&self.chain.id, &self.node_id, &msg, &joined_relation, err.as_ref());
        if !dispatched_any {
            self.state.record_leaf(DispatchOutcome {
                node_id: self.node_id.clone(),
                relation: joined_relation,
                msg,
                err,
            });
        }
        self.state.leave();
    }
}

#[async_trait]
impl RuleContext for DispatchContext {
    fn self_id(&self) -> &str {
        &self.node_id
    }

    fn chain_id(&self) -> &str {
        &self.chain.id
    }

    fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn tell_success(&self, msg: Msg) {
        self.route(msg, vec!["Success".to_string()], None);
    }

    async fn tell_failure(&self, msg: Msg, err: RuleError) {
        self.route(msg, vec!["Failure".to_string()], Some(err));
    }

    async fn tell_next(&self, msg: Msg, relations: Vec<String>) {
        self.route(msg, relations, None);
    }

    async fn tell_next_or_else(&self, msg: Msg, default_relation: String, relations: Vec<String>) {
        let matched: Vec<String> = relations
            .into_iter()
            .filter(|r| !self.chain.targets(&self.node_id, r).is_empty())
            .collect();
        let relations = if matched.is_empty() { vec![default_relation] } else { matched };
        self.route(msg, relations, None);
    }

    async fn tell_self(&self, msg: Msg, delay_ms: u64) {
        self.chain
            .debug
            .record_out(&self.chain.id, &self.node_id, &msg, "Self", None);
        self.state.enter();
        let chain = self.chain.clone();
        let node_id = self.node_id.clone();
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let handle = self.handle.clone();
        tokio::spawn(async move {
            if delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
            spawn_node(chain, node_id, msg, state, cancel, handle);
        });
        self.state.leave();
    }

    async fn tell_flow(&self, chain_id: String, msg: Msg) {
        self.chain
            .debug
            .record_out(&self.chain.id, &self.node_id, &msg, "ToFlow", None);
        let state = self.state.clone();
        self.handle.dispatch_detached(chain_id, msg, move || state.leave());
    }

    async fn tell_node(&self, node_id: &str, msg: Msg) -> ChildOutcome {
        run_child_node(&self.chain, node_id, msg, self.cancel.clone(), self.handle.clone()).await
    }
}

/// Run `node_id` directly, bypassing any outgoing edges it might have, and
/// capture its single terminal call as a [`ChildOutcome`].
pub(crate) async fn run_child_node(
    chain: &Arc<CompiledChain>,
    node_id: &str,
    msg: Msg,
    cancel: CancellationToken,
    handle: RuntimeHandle,
) -> ChildOutcome {
    let Some(node) = chain.nodes.get(node_id).cloned() else {
        return ChildOutcome {
            relation: "Failure".to_string(),
            msg,
            err: Some(RuleError::NotFound(node_id.to_string())),
        };
    };

    chain.debug.record_in(&chain.id, node_id, &msg);
    let (tx, rx) = oneshot::channel();
    let ctx: Arc<dyn RuleContext> = Arc::new(CaptureContext {
        node_id: node_id.to_string(),
        chain: chain.clone(),
        cancel,
        handle,
        sender: Mutex::new(Some(tx)),
    });
    node.on_msg(ctx, msg).await;
    rx.await.unwrap_or_else(|_| ChildOutcome {
        relation: "Failure".to_string(),
        msg: Msg::new(
            0,
            "T",
            rcr_core::DataType::Text,
            rcr_core::Metadata::new(),
            Vec::new(),
        ),
        err: Some(RuleError::Internal("node never told a terminal outcome".into())),
    })
}

/// A [`RuleContext`] that captures a node's first `Tell*` call as a
/// [`ChildOutcome`] instead of walking that node's outgoing edges. Used for
/// [`RuleContext::tell_node`]'s direct-dispatch contract.
struct CaptureContext {
    node_id: String,
    chain: Arc<CompiledChain>,
    cancel: CancellationToken,
    handle: RuntimeHandle,
    sender: Mutex<Option<oneshot::Sender<ChildOutcome>>>,
}

impl CaptureContext {
    fn complete(&self, relation: String, msg: Msg, err: Option<RuleError>) {
        self.chain.debug.record_out(&self.chain.id, &self.node_id, &msg, &relation, err.as_ref());
        if let Some(tx) = self.sender.lock().expect("capture sender lock poisoned").take() {
            let _ = tx.send(ChildOutcome { relation, msg, err });
        }
    }
}

#[async_trait]
impl RuleContext for CaptureContext {
    fn self_id(&self) -> &str {
        &self.node_id
    }

    fn chain_id(&self) -> &str {
        &self.chain.id
    }

    fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn tell_success(&self, msg: Msg) {
        self.complete("Success".to_string(), msg, None);
    }

    async fn tell_failure(&self, msg: Msg, err: RuleError) {
        self.complete("Failure".to_string(), msg, Some(err));
    }

    async fn tell_next(&self, msg: Msg, relations: Vec<String>) {
        let relation = relations.into_iter().next().unwrap_or_else(|| "Success".to_string());
        self.complete(relation, msg, None);
    }

    async fn tell_next_or_else(&self, msg: Msg, default_relation: String, relations: Vec<String>) {
        let relation = relations.into_iter().next().unwrap_or(default_relation);
        self.complete(relation, msg, None);
    }

    async fn tell_self(&self, msg: Msg, delay_ms: u64) {
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        if self.cancel.is_cancelled() {
            self.complete(
                "Failure".to_string(),
                msg,
                Some(RuleError::Cancelled(self.node_id.clone())),
            );
            return;
        }
        let outcome = Box::pin(run_child_node(
            &self.chain,
            &self.node_id,
            msg,
            self.cancel.clone(),
            self.handle.clone(),
        ))
        .await;
        if let Some(tx) = self.sender.lock().expect("capture sender lock poisoned").take() {
            let _ = tx.send(outcome);
        }
    }

    async fn tell_flow(&self, chain_id: String, msg: Msg) {
        let chain = self.chain.clone();
        let node_id = self.node_id.clone();
        let reported_msg = msg.copy();
        let sender = self.sender.lock().expect("capture sender lock poisoned").take();
        self.handle.dispatch_detached(chain_id, msg, move || {
            chain.debug.record_out(&chain.id, &node_id, &reported_msg, "Success", None);
            if let Some(tx) = sender {
                let _ = tx.send(ChildOutcome { relation: "Success".to_string(), msg: reported_msg, err: None });
            }
        });
    }

    async fn tell_node(&self, node_id: &str, msg: Msg) -> ChildOutcome {
        run_child_node(&self.chain, node_id, msg, self.cancel.clone(), self.handle.clone()).await
    }
}
