//! Typed event bus for mesh observability
//!
//! Consumers subscribe to one broadcast stream of [`MeshEvent`] values
//! instead of string-keyed callbacks. Events are observability, not control
//! flow: a lagging subscriber loses the oldest events rather than applying
//! backpressure to the mesh.

use crate::consensus::{ByzantineFault, VoteChoice};
use crate::types::{DocId, NodeHealth, NodeId, OperationId, PlaybookId, RoundId};
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything observable about the mesh core, across all three subsystems
#[derive(Clone, Debug)]
pub enum MeshEvent {
    // Node lifecycle
    NodeRegistered { node_id: NodeId },
    NodeUnregistered { node_id: NodeId },
    NodeQuarantined { node_id: NodeId, score: u8 },
    NodeHealthChanged { node_id: NodeId, health: NodeHealth },

    // Replicated documents
    DocumentCreated { doc_id: DocId, node_id: NodeId },
    DocumentUpdated { doc_id: DocId, node_id: NodeId },
    DocumentsMerged { doc_id: DocId, conflicts: usize },
    StateImported { doc_id: DocId, source: NodeId },

    // Consensus
    ProposalBroadcast { round_id: RoundId, healthy_nodes: usize },
    VoteTallied { round_id: RoundId, voter: NodeId, choice: VoteChoice },
    ConsensusReached { round_id: RoundId, accepted: bool },
    ConsensusTimedOut { round_id: RoundId },
    ByzantineDetected { node_id: NodeId, fault: ByzantineFault, score: u8 },

    // Offline queue and synchronization
    OperationQueued { operation_id: OperationId },
    OperationSynced { operation_id: OperationId },
    SyncFailed { operation_id: OperationId, reason: String },

    // Partitions and recovery
    PartitionDetected { nodes: Vec<NodeId> },
    PartitionHealed { node_id: NodeId },
    ReconstructionStarted { node_id: NodeId },
    ReconstructionCompleted { node_id: NodeId, documents: usize },
    ReconstructionFailed { reason: String },
    PlaybookStarted { playbook_id: PlaybookId },
    PlaybookStepCompleted { playbook_id: PlaybookId, step_id: String },
    PlaybookStepRolledBack { playbook_id: PlaybookId, step_id: String },
    PlaybookFinished { playbook_id: PlaybookId, success: bool },
}

/// Cheap-to-clone handle shared by every component that emits events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MeshEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Send errors (no live subscribers) are ignored.
    pub fn emit(&self, event: MeshEvent) {
        tracing::trace!(?event, "mesh event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_emitted_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(MeshEvent::NodeRegistered {
            node_id: NodeId::from("n1"),
        });

        match rx.recv().await {
            Ok(MeshEvent::NodeRegistered { node_id }) => assert_eq!(node_id, NodeId::from("n1")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_does_not_fail() {
        let bus = EventBus::default();
        bus.emit(MeshEvent::ConsensusTimedOut {
            round_id: RoundId::new(),
        });
    }
}
