// SPDX-License-Identifier: MIT OR Apache-2.0

//! The chain DSL: the JSON shape a rule chain is loaded from, plus the
//! `${ns.key}` template syntax used inside node configuration strings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Top-level chain DSL document: `{"ruleChain": {...}, "metadata": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleChainDsl {
    /// Chain identity and root flag.
    pub rule_chain: RuleChainMeta,
    /// Nodes, connections, and endpoint bindings.
    pub metadata: ChainMetadata,
}

/// Chain-level identity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleChainMeta {
    /// Unique chain id.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Explicit root flag; if absent, roots are determined by in-degree 0.
    #[serde(default)]
    pub root: bool,
    /// Chain-scoped variables resolvable at compile time via `${vars.x}`.
    #[serde(default)]
    pub additional_info: serde_json::Map<String, serde_json::Value>,
}

/// The graph: nodes, connections, and the endpoints that may feed it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChainMetadata {
    /// Node definitions.
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    /// Directed, relation-typed edges between node ids.
    #[serde(default)]
    pub connections: Vec<ConnectionDef>,
    /// Opaque endpoint bindings; the endpoint crate interprets these.
    #[serde(default)]
    pub endpoints: Vec<serde_json::Value>,
}

/// A single node's declaration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeDef {
    /// Unique (within the chain) node id.
    pub id: String,
    /// Component-registry type name.
    #[serde(rename = "type")]
    pub type_: String,
    /// Optional display name.
    #[serde(default)]
    pub name: String,
    /// Node-specific configuration, handed to `Init` after compile-time
    /// template substitution.
    #[serde(default)]
    pub configuration: serde_json::Value,
}

/// A directed, relation-typed edge.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDef {
    /// Source node id.
    pub from_id: String,
    /// Destination node id.
    pub to_id: String,
    /// Relation label gating this edge (`Success`, `Failure`, ...).
    #[serde(rename = "type")]
    pub relation_type: String,
}

/// A config value that may arrive as a comma-separated string, a list of
/// strings, or a heterogeneous list — all normalized to `Vec<String>`.
///
/// The group-action node's `nodeIds` field accepts all three shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StringOrList(pub Vec<String>);

impl<'de> Deserialize<'de> for StringOrList {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self(normalize_string_or_list(&value)))
    }
}

fn normalize_string_or_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        serde_json::Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

/// Resolve `${ns.key}` placeholders in `template` using `resolver`.
/// Placeholders the resolver declines (returns `None` for) are left intact
/// verbatim — this is how compile-time substitution leaves `${metadata.*}`
/// and `${msg.*}` untouched for the runtime to resolve per-message.
#[must_use]
pub fn render_template(template: &str, resolver: impl Fn(&str, &str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = template[i + 2..].find('}') {
                let inner = &template[i + 2..i + 2 + end];
                if let Some((ns, key)) = inner.split_once('.') {
                    if let Some(resolved) = resolver(ns, key) {
                        out.push_str(&resolved);
                        i += 2 + end + 1;
                        continue;
                    }
                }
                // Unresolvable or malformed placeholder: keep it verbatim.
                out.push_str(&template[i..i + 2 + end + 1]);
                i += 2 + end + 1;
                continue;
            }
        }
        let ch_len = template[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&template[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// Resolve only `${global.*}` and `${vars.*}` placeholders at compile time,
/// leaving `${metadata.*}` and `${msg.*}` for the runtime.
#[must_use]
pub fn render_compile_time_template(
    template: &str,
    global: &std::collections::HashMap<String, String>,
    vars: &std::collections::HashMap<String, String>,
) -> String {
    render_template(template, |ns, key| match ns {
        "global" => global.get(key).cloned(),
        "vars" => vars.get(key).cloned(),
        _ => None,
    })
}
