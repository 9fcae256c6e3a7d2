// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Built-in node factories registered into every fresh
//! [`rcr_registry::ComponentRegistry`]: `log`, `jsonFilter`, `groupAction`,
//! `mqttClient`, and `flow`.

mod filter;
mod flow;
mod log_node;
mod mqtt;

pub use filter::JsonFilterNode;
pub use flow::FlowNode;
pub use log_node::LogNode;
pub use mqtt::{LoggingMqttTransport, MqttClientNode, MqttTransport};

/// Re-exported so callers can name the `groupAction` node type without a
/// direct dependency on `rcr-aggregator`.
pub use rcr_aggregator::GroupActionNode;

use rcr_registry::{ComponentRegistry, Node};

/// Register every built-in node type into `registry` under its DSL type
/// name. Call once when assembling a fresh [`rcr_registry::TypedRegistry`]
/// before loading any chains.
pub fn register_builtins(registry: &ComponentRegistry) {
    registry
        .register("log", || Box::new(LogNode::default()) as Box<dyn Node>)
        .expect("log is a fresh registration");
    registry
        .register("jsonFilter", || Box::new(JsonFilterNode::default()) as Box<dyn Node>)
        .expect("jsonFilter is a fresh registration");
    registry
        .register("groupAction", || Box::new(rcr_aggregator::GroupActionNode::default()) as Box<dyn Node>)
        .expect("groupAction is a fresh registration");
    registry
        .register("mqttClient", || Box::new(MqttClientNode::default()) as Box<dyn Node>)
        .expect("mqttClient is a fresh registration");
    registry
        .register("flow", || Box::new(FlowNode::default()) as Box<dyn Node>)
        .expect("flow is a fresh registration");
}
