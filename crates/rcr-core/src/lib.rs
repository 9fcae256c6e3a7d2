// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Core data model for the rule-chain runtime: the message envelope and its
//! copy-on-write payload, the chain DSL, and the shared error taxonomy.
//!
//! This crate has no knowledge of graph execution, aggregation, or I/O — it
//! is the vocabulary the rest of the runtime is built from.

mod chain;
mod error;
mod msg;

pub use chain::{
    ChainMetadata, ConnectionDef, NodeDef, RuleChainDsl, RuleChainMeta, StringOrList,
    render_compile_time_template, render_template,
};
pub use error::{ErrorCategory, RuleError, RuleResult};
pub use msg::{DataType, Metadata, Msg, SharedData};
