// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-chain debug observer: a bounded, drop-oldest ring buffer of
//! terminal-call events, plus the object pool debug records are drawn from
//! so high-throughput chains don't thrash the allocator.

use rcr_core::{Msg, RuleError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default per-chain debug ring capacity.
pub const DEFAULT_RING_CAPACITY: usize = 60;

/// Which side of a node dispatch an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    /// The message arrived at the node.
    In,
    /// The node told a terminal outcome.
    Out,
}

/// One terminal-call observation, `(chainId, direction, nodeId, msg, relation, err?)`.
#[derive(Clone)]
pub struct DebugEvent {
    /// Chain the event happened in.
    pub chain_id: String,
    /// Whether this is the inbound or outbound half of a dispatch.
    pub direction: FlowDirection,
    /// Node the event concerns.
    pub node_id: String,
    /// The message at the time of the event.
    pub msg: Msg,
    /// The relation told, if this is an `Out` event.
    pub relation: Option<String>,
    /// The error, if the node told failure.
    pub error: Option<String>,
}

struct RecordPool {
    free: Mutex<Vec<Box<DebugEvent>>>,
}

impl RecordPool {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self, event: DebugEvent) -> Box<DebugEvent> {
        let mut free = self.free.lock().expect("debug pool lock poisoned");
        if let Some(mut slot) = free.pop() {
            *slot = event;
            slot
        } else {
            Box::new(event)
        }
    }

    fn release(&self, record: Box<DebugEvent>) {
        let mut free = self.free.lock().expect("debug pool lock poisoned");
        // Bound the free list so a burst of chain activity can't leave an
        // unbounded pool of dead allocations behind.
        if free.len() < DEFAULT_RING_CAPACITY {
            free.push(record);
        }
    }
}

/// A bounded, per-chain ring of recent debug events. Pushing past capacity
/// drops the oldest entry.
pub struct DebugRing {
    capacity: usize,
    buffer: Mutex<VecDeque<Box<DebugEvent>>>,
    pool: RecordPool,
}

impl DebugRing {
    /// Create a ring with the given capacity (clamped to at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            pool: RecordPool::new(),
        }
    }

    /// Push an `IN` event.
    pub fn record_in(&self, chain_id: &str, node_id: &str, msg: &Msg) {
        self.push(DebugEvent {
            chain_id: chain_id.to_string(),
            direction: FlowDirection::In,
            node_id: node_id.to_string(),
            msg: msg.copy(),
            relation: None,
            error: None,
        });
    }

    /// Push an `OUT` event.
    pub fn record_out(
        &self,
        chain_id: &str,
        node_id: &str,
        msg: &Msg,
        relation: &str,
        err: Option<&RuleError>,
    ) {
        self.push(DebugEvent {
            chain_id: chain_id.to_string(),
            direction: FlowDirection::Out,
            node_id: node_id.to_string(),
            msg: msg.copy(),
            relation: Some(relation.to_string()),
            error: err.map(ToString::to_string),
        });
    }

    fn push(&self, event: DebugEvent) {
        let record = self.pool.acquire(event);
        let mut buffer = self.buffer.lock().expect("debug ring lock poisoned");
        if buffer.len() >= self.capacity {
            if let Some(evicted) = buffer.pop_front() {
                self.pool.release(evicted);
            }
        }
        buffer.push_back(record);
    }

    /// Snapshot the current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DebugEvent> {
        self.buffer
            .lock()
            .expect("debug ring lock poisoned")
            .iter()
            .map(|boxed| (**boxed).clone())
            .collect()
    }

    /// Number of events currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().expect("debug ring lock poisoned").len()
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle to a chain's debug ring, installed at compile time.
pub type SharedDebugRing = Arc<DebugRing>;

#[cfg(test)]
mod tests {
    use super::*;
    use rcr_core::{DataType, Metadata};

    fn msg() -> Msg {
        Msg::new(0, "T", DataType::Text, Metadata::new(), b"x".to_vec())
    }

    #[test]
    fn ring_drops_oldest_past_capacity() {
        let ring = DebugRing::new(2);
        ring.record_in("c", "n1", &msg());
        ring.record_in("c", "n2", &msg());
        ring.record_in("c", "n3", &msg());
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].node_id, "n2");
        assert_eq!(snapshot[1].node_id, "n3");
    }

    #[test]
    fn out_event_carries_relation_and_error() {
        let ring = DebugRing::new(10);
        ring.record_out("c", "n1", &msg(), "Success", None);
        let snapshot = ring.snapshot();
        assert_eq!(snapshot[0].relation.as_deref(), Some("Success"));
        assert!(snapshot[0].error.is_none());
    }

    #[test]
    fn capacity_is_clamped_to_at_least_one() {
        let ring = DebugRing::new(0);
        ring.record_in("c", "n1", &msg());
        ring.record_in("c", "n2", &msg());
        assert_eq!(ring.len(), 1);
    }
}
