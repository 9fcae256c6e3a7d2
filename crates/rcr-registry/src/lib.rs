// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Node/endpoint trait contracts and the process-wide type-name registry
//! they are looked up through.

mod node;
mod registry;

pub use node::{ChildOutcome, Node, RuleContext};
pub use registry::TypedRegistry;

/// Registry of node-type factories, keyed by the component-type string used
/// in chain DSL node definitions.
pub type ComponentRegistry = TypedRegistry<dyn Node>;
