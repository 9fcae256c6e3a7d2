// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Rule-chain compilation and execution: turns a [`rcr_core::RuleChainDsl`]
//! into a live graph of [`rcr_registry::Node`] instances and drives messages
//! through it, fanning out across declared edges and resolving once every
//! branch has told a terminal outcome.

mod compile;
mod context;
mod debug;
mod runtime;

pub use compile::{compile_chain, AdjacencyMap, CompiledChain};
pub use context::DispatchOutcome;
pub use debug::{DebugEvent, DebugRing, FlowDirection, SharedDebugRing, DEFAULT_RING_CAPACITY};
pub use runtime::{Runtime, RuntimeHandle};
