//! Offline operation queue
//!
//! Operations submitted while partitioned are queued here instead of being
//! propagated. The synchronization pass drains the queue in FIFO order;
//! operations that fail to propagate are requeued rather than lost.

use crate::clock::VectorClock;
use crate::types::{NodeId, OperationId, OperationKind, Payload};
use crate::{Error, Result};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of operations buffered before rejecting new ones
const MAX_QUEUED_OPS: usize = 10_000;

/// A mutation captured while the node was partitioned
#[derive(Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize, Debug)]
pub struct OfflineOperation {
    #[n(0)]
    pub operation_id: OperationId,
    #[n(1)]
    pub node_id: NodeId,
    #[n(2)]
    pub kind: OperationKind,
    #[n(3)]
    pub data: Payload,
    /// Clock snapshot taken when the operation was submitted
    #[n(4)]
    pub vector_clock: VectorClock,
    #[n(5)]
    pub timestamp_ms: u64,
    #[n(6)]
    pub synced: bool,
}

/// FIFO queue of unsynced operations
#[derive(Default, Debug)]
pub struct OfflineQueue {
    ops: VecDeque<OfflineOperation>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, op: OfflineOperation) -> Result<()> {
        if self.ops.len() >= MAX_QUEUED_OPS {
            return Err(Error::QueueFull);
        }
        self.ops.push_back(op);
        Ok(())
    }

    /// Drain every queued operation for a synchronization attempt.
    /// Failures must be handed back via [`OfflineQueue::requeue`].
    pub fn take_all(&mut self) -> Vec<OfflineOperation> {
        self.ops.drain(..).collect()
    }

    /// Return a failed operation to the back of the queue. Callers requeue
    /// failures in their original order, so relative ordering is preserved
    /// across sync attempts.
    pub fn requeue(&mut self, op: OfflineOperation) {
        self.ops.push_back(op);
    }

    pub fn operation_ids(&self) -> Vec<OperationId> {
        self.ops.iter().map(|op| op.operation_id).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_ms;

    fn op(node: &str) -> OfflineOperation {
        OfflineOperation {
            operation_id: OperationId::new(),
            node_id: NodeId::from(node),
            kind: OperationKind::Write,
            data: Payload::from_text("data"),
            vector_clock: VectorClock::new(),
            timestamp_ms: now_ms(),
            synced: false,
        }
    }

    #[test]
    fn test_fifo_order_preserved() {
        let mut queue = OfflineQueue::new();
        let first = op("n1");
        let second = op("n1");
        queue.enqueue(first.clone()).expect("enqueue");
        queue.enqueue(second.clone()).expect("enqueue");

        let drained = queue.take_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].operation_id, first.operation_id);
        assert_eq!(drained[1].operation_id, second.operation_id);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_returns_failures() {
        let mut queue = OfflineQueue::new();
        queue.enqueue(op("n1")).expect("enqueue");

        let mut drained = queue.take_all();
        assert!(queue.is_empty());
        queue.requeue(drained.remove(0));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queue_full() {
        let mut queue = OfflineQueue::new();
        for _ in 0..MAX_QUEUED_OPS {
            queue.enqueue(op("n1")).expect("enqueue");
        }
        assert!(matches!(queue.enqueue(op("n1")), Err(Error::QueueFull)));
    }

    #[test]
    fn test_operation_cbor_round_trip() {
        let op = op("n1");
        let bytes = minicbor::to_vec(&op).expect("encode failed");
        let decoded: OfflineOperation = minicbor::decode(&bytes).expect("decode failed");
        assert_eq!(op, decoded);
    }
}
