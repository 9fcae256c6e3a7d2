// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chain compilation: factory lookup, compile-time template substitution,
//! adjacency-map construction, and root/cycle analysis.

use crate::debug::{DebugRing, DEFAULT_RING_CAPACITY};
use rcr_core::{render_compile_time_template, RuleChainDsl, RuleError};
use rcr_registry::{ComponentRegistry, Node};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// `fromId -> relationType -> [toId]`, edges in declaration order.
pub type AdjacencyMap = HashMap<String, HashMap<String, Vec<String>>>;

/// A compiled, ready-to-drive rule chain.
pub struct CompiledChain {
    /// Chain id.
    pub id: String,
    /// Chain display name.
    pub name: String,
    /// Node instances, keyed by node id.
    pub nodes: HashMap<String, Arc<dyn Node>>,
    /// Outgoing edges.
    pub edges: AdjacencyMap,
    /// Root node ids, in declaration order.
    pub roots: Vec<String>,
    /// This chain instance's debug ring.
    pub debug: Arc<DebugRing>,
}

impl CompiledChain {
    /// Outgoing `toId`s for `node_id` under `relation`, in declaration
    /// order. Empty if there is no such edge.
    #[must_use]
    pub fn targets(&self, node_id: &str, relation: &str) -> Vec<String> {
        self.edges
            .get(node_id)
            .and_then(|by_relation| by_relation.get(relation))
            .cloned()
            .unwrap_or_default()
    }
}

/// Compile a chain DSL document into a [`CompiledChain`].
///
/// `global` resolves `${global.x}` placeholders; chain-scoped `${vars.x}`
/// placeholders resolve from `ruleChain.additionalInfo`. `${metadata.*}` and
/// `${msg.*}` placeholders are left for the runtime to resolve per message.
pub fn compile_chain(
    dsl: &RuleChainDsl,
    registry: &ComponentRegistry,
    global: &HashMap<String, String>,
    debug_capacity: Option<usize>,
) -> Result<CompiledChain, RuleError> {
    let vars: HashMap<String, String> = dsl
        .rule_chain
        .additional_info
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();

    let mut seen_ids = HashSet::new();
    for node in &dsl.metadata.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(RuleError::Config(format!("duplicate node id: {}", node.id)));
        }
    }
    for conn in &dsl.metadata.connections {
        if !seen_ids.contains(conn.from_id.as_str()) {
            return Err(RuleError::Config(format!(
                "connection references unknown fromId: {}",
                conn.from_id
            )));
        }
        if !seen_ids.contains(conn.to_id.as_str()) {
            return Err(RuleError::Config(format!(
                "connection references unknown toId: {}",
                conn.to_id
            )));
        }
    }

    reject_cycles(dsl)?;

    let mut nodes = HashMap::new();
    for node_def in &dsl.metadata.nodes {
        let mut instance = registry.create(&node_def.type_)?;
        let config = substitute_templates(&node_def.configuration, global, &vars);
        instance.init(config)?;
        nodes.insert(node_def.id.clone(), Arc::from(instance));
    }

    let mut edges: AdjacencyMap = HashMap::new();
    for conn in &dsl.metadata.connections {
        edges
            .entry(conn.from_id.clone())
            .or_default()
            .entry(conn.relation_type.clone())
            .or_default()
            .push(conn.to_id.clone());
    }

    let mut in_degree: HashMap<&str, usize> =
        dsl.metadata.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for conn in &dsl.metadata.connections {
        *in_degree.get_mut(conn.to_id.as_str()).unwrap() += 1;
    }

    let roots: Vec<String> = dsl
        .metadata
        .nodes
        .iter()
        .filter(|n| in_degree.get(n.id.as_str()).copied() == Some(0))
        .map(|n| n.id.clone())
        .collect();

    if roots.is_empty() && !dsl.metadata.nodes.is_empty() {
        return Err(RuleError::Config(
            "chain has no root entry point: every node has an incoming edge".into(),
        ));
    }

    Ok(CompiledChain {
        id: dsl.rule_chain.id.clone(),
        name: dsl.rule_chain.name.clone(),
        nodes,
        edges,
        roots,
        debug: Arc::new(DebugRing::new(debug_capacity.unwrap_or(DEFAULT_RING_CAPACITY))),
    })
}

fn substitute_templates(
    value: &serde_json::Value,
    global: &HashMap<String, String>,
    vars: &HashMap<String, String>,
) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            serde_json::Value::String(render_compile_time_template(s, global, vars))
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|v| substitute_templates(v, global, vars)).collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_templates(v, global, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Reject cycles in the static connection graph. `TellSelf` re-entrance is
/// not represented as a declared connection, so it never trips this check.
fn reject_cycles(dsl: &RuleChainDsl) -> Result<(), RuleError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for conn in &dsl.metadata.connections {
        adjacency
            .entry(conn.from_id.as_str())
            .or_default()
            .push(conn.to_id.as_str());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), RuleError> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(RuleError::Config(format!(
                    "cycle detected in compile-time chain graph at node {node}"
                )));
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        if let Some(targets) = adjacency.get(node) {
            for target in targets {
                visit(target, adjacency, marks)?;
            }
        }
        marks.insert(node, Mark::Done);
        Ok(())
    }

    for node_def in &dsl.metadata.nodes {
        visit(node_def.id.as_str(), &adjacency, &mut marks)?;
    }
    Ok(())
}
