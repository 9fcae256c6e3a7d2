// SPDX-License-Identifier: MIT OR Apache-2.0

//! The running chain registry: compiles, holds, and dispatches messages
//! into chains by id.

use crate::compile::{compile_chain, CompiledChain};
use crate::context::{spawn_node, DispatchOutcome, DispatchState};
use rcr_cancel::CancellationToken;
use rcr_core::{Msg, RuleChainDsl, RuleError, RuleResult};
use rcr_registry::ComponentRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A cheap, cloneable handle to the live chain table, held by every
/// in-flight [`RuleContext`](rcr_registry::RuleContext) so `tell_flow` can
/// reach sibling chains without holding a reference to the owning
/// [`Runtime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    chains: Arc<RwLock<HashMap<String, Arc<CompiledChain>>>>,
}

impl RuntimeHandle {
    /// Fire a chain-to-chain dispatch without blocking the caller: the
    /// delegating node's own `Tell*` call returns immediately, but
    /// `on_complete` only runs once the flowed-to chain's dispatch has
    /// actually finished (or failed to find its target), so a caller that
    /// uses `on_complete` to decrement its own in-flight counter still
    /// resolves only after every branch — including this handoff — has
    /// terminated. Errors and the flowed-to chain's own outcomes are
    /// logged, not propagated to the caller.
    pub(crate) fn dispatch_detached(&self, chain_id: String, msg: Msg, on_complete: impl FnOnce() + Send + 'static) {
        let chains = self.chains.clone();
        let handle = self.clone();
        tokio::spawn(async move {
            let chain = { chains.read().await.get(&chain_id).cloned() };
            match chain {
                Some(chain) => {
                    if let Err(err) = run_dispatch(chain, msg, handle).await {
                        tracing::warn!(chain = %chain_id, error = %err, "tell_flow dispatch failed");
                    }
                }
                None => tracing::warn!(chain = %chain_id, "tell_flow target chain not found"),
            }
            on_complete();
        });
    }
}

/// Drives compiled chains: load/unload by id, and dispatch messages into a
/// chain's root nodes, resolving once every fanned-out branch has told a
/// terminal outcome.
pub struct Runtime {
    registry: Arc<ComponentRegistry>,
    global: HashMap<String, String>,
    debug_capacity: usize,
    handle: RuntimeHandle,
}

impl Runtime {
    /// Build a runtime over `registry`, with `global` resolving
    /// `${global.*}` placeholders at compile time.
    #[must_use]
    pub fn new(registry: Arc<ComponentRegistry>, global: HashMap<String, String>, debug_capacity: usize) -> Self {
        Self {
            registry,
            global,
            debug_capacity,
            handle: RuntimeHandle {
                chains: Arc::new(RwLock::new(HashMap::new())),
            },
        }
    }

    /// Compile `dsl` and make it reachable by its chain id. Replaces any
    /// previously loaded chain under the same id; messages already in
    /// flight against the old chain hold their own `Arc` clone and keep
    /// running against it.
    pub async fn load_chain(&self, dsl: &RuleChainDsl) -> RuleResult<()> {
        let compiled = compile_chain(dsl, &self.registry, &self.global, Some(self.debug_capacity))?;
        let id = compiled.id.clone();
        self.handle.chains.write().await.insert(id, Arc::new(compiled));
        Ok(())
    }

    /// Remove a chain from the registry. Node instances are dropped, not
    /// explicitly destroyed: any resource they hold (e.g. a shared-node
    /// pool handle) releases itself on drop.
    pub async fn unload_chain(&self, chain_id: &str) -> bool {
        self.handle.chains.write().await.remove(chain_id).is_some()
    }

    /// Look up a compiled chain by id.
    pub async fn get_chain(&self, chain_id: &str) -> Option<Arc<CompiledChain>> {
        self.handle.chains.read().await.get(chain_id).cloned()
    }

    /// List the ids of every loaded chain.
    pub async fn list_chains(&self) -> Vec<String> {
        self.handle.chains.read().await.keys().cloned().collect()
    }

    /// Drive `msg` through `chain_id`'s root nodes and collect every leaf
    /// outcome (a terminal `Tell*` call with no outgoing edge to carry it
    /// further), in completion order.
    pub async fn dispatch(&self, chain_id: &str, msg: Msg) -> RuleResult<Vec<DispatchOutcome>> {
        let chain = self
            .get_chain(chain_id)
            .await
            .ok_or_else(|| RuleError::NotFound(chain_id.to_string()))?;
        run_dispatch(chain, msg, self.handle.clone()).await
    }

    /// A cloneable handle usable by node implementations that need to reach
    /// the live chain table directly (e.g. an endpoint adapter).
    #[must_use]
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }
}

async fn run_dispatch(
    chain: Arc<CompiledChain>,
    msg: Msg,
    handle: RuntimeHandle,
) -> RuleResult<Vec<DispatchOutcome>> {
    if chain.roots.is_empty() {
        return Ok(Vec::new());
    }
    let (state, done) = DispatchState::new();
    let cancel = CancellationToken::new();
    for root in &chain.roots {
        state.enter();
        spawn_node(chain.clone(), root.clone(), msg.copy(), state.clone(), cancel.clone(), handle.clone());
    }
    let _ = done.await;
    Ok(state.take_outcomes())
}
