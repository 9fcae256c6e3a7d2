// SPDX-License-Identifier: MIT OR Apache-2.0

//! The [`Node`] capability contract and the [`RuleContext`] a node uses to
//! tell its result onward. Defined at this layer (rather than alongside the
//! executor) because both the component registry and every node
//! implementation need to see them without depending on the executor.

use async_trait::async_trait;
use rcr_cancel::CancellationToken;
use rcr_core::{Msg, RuleError};
use std::sync::Arc;

/// The outcome of a direct, non-edge-routed dispatch made through
/// [`RuleContext::tell_node`] — used by the group-action aggregator to run
/// children without letting their terminal calls walk the graph.
pub struct ChildOutcome {
    /// The relation the child told (`"Success"`, `"Failure"`, or a custom
    /// label passed to `tell_next`/`tell_next_or_else`).
    pub relation: String,
    /// The message the child told with.
    pub msg: Msg,
    /// Set when the child's terminal call was `tell_failure`.
    pub err: Option<RuleError>,
}

/// The per-message, per-node handle a node uses to report its outcome.
///
/// A node's `on_msg` must eventually call exactly one of these. Which
/// concrete context a node sees — root, child of a `TellNext`, or a direct
/// [`RuleContext::tell_node`] invocation — is an implementation detail of
/// `rcr-runtime`.
#[async_trait]
pub trait RuleContext: Send + Sync {
    /// The id of the node currently executing against this context.
    fn self_id(&self) -> &str;

    /// The id of the chain this context belongs to.
    fn chain_id(&self) -> &str;

    /// The cancellation token governing this context and everything it
    /// spawns.
    fn cancellation_token(&self) -> &CancellationToken;

    /// Terminal call: the node succeeded; equivalent to `tell_next` with the
    /// `Success` relation.
    async fn tell_success(&self, msg: Msg);

    /// Terminal call: the node failed.
    async fn tell_failure(&self, msg: Msg, err: RuleError);

    /// Terminal call: dispatch to every outgoing edge matching any of
    /// `relations`.
    async fn tell_next(&self, msg: Msg, relations: Vec<String>);

    /// Terminal call: dispatch on `relations` if any edges match, otherwise
    /// fall back to `default_relation`.
    async fn tell_next_or_else(&self, msg: Msg, default_relation: String, relations: Vec<String>);

    /// Terminal call: re-deliver to this same node after `delay_ms`.
    async fn tell_self(&self, msg: Msg, delay_ms: u64);

    /// Terminal call: delegate to another chain by id.
    async fn tell_flow(&self, chain_id: String, msg: Msg);

    /// Invoke `node_id` directly, bypassing edge routing, and resolve once
    /// that node's single terminal call has happened. Used by the
    /// group-action aggregator to run its children. If `node_id` does not
    /// exist in the current chain, resolves immediately to a
    /// `Failure(NotFound)` outcome rather than erroring.
    async fn tell_node(&self, node_id: &str, msg: Msg) -> ChildOutcome;
}

/// A single processing unit in a compiled chain.
///
/// Each instance is owned by exactly one chain instance and is destroyed
/// (via [`Node::destroy`]) when that chain is unloaded.
#[async_trait]
pub trait Node: Send + Sync {
    /// The component-registry type name this node was created under.
    fn type_name(&self) -> &'static str;

    /// Parse and apply `config`, typically via `serde_json::from_value`.
    fn init(&mut self, config: serde_json::Value) -> Result<(), RuleError>;

    /// Process one message. Must end in exactly one `Tell*` call on `ctx`.
    async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: Msg);

    /// Release any resources held by this instance (e.g. release a shared
    /// pool handle). Default is a no-op.
    fn destroy(&mut self) {}
}
