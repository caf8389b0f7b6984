//! Mesh resilience orchestrator
//!
//! The single externally-facing surface of the core. Composes the document
//! store and the consensus engine, owns the canonical node registry and
//! the offline queue, and drives partition handling, peer-assisted
//! reconstruction, and recovery playbooks.
//!
//! Lock discipline: the registry, document store, offline queue, and
//! playbook catalog each sit behind their own lock, and no lock is held
//! across a call into the consensus engine. The two subsystems stay
//! decoupled.

use crate::consensus::{
    ByzantineVote, ConsensusEngine, RoundStatus, VoteOutcome, VoteVerifier,
};
use crate::crdt::{
    DocumentState, DocumentStore, GCounter, LwwRegister, MergeOutcome, OrSet, StateSnapshot,
};
use crate::events::{EventBus, MeshEvent};
use crate::mesh::config::MeshConfig;
use crate::mesh::offline::{OfflineOperation, OfflineQueue};
use crate::mesh::playbook::{
    PlaybookReport, RecoveryPlaybook, StepReport, StepRunner, StepStatus, TriggerEvent,
};
use crate::transport::Transport;
use crate::types::{
    now_ms, DocId, MeshNode, NodeHealth, NodeId, NodeStatus, OperationId, OperationKind, Payload,
    PlaybookId,
};
use crate::{Error, Result};
use minicbor::{Decode, Encode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Standard documents created by [`MeshManager::initialize`]
pub const MESH_OPERATIONS_DOC: &str = "mesh-operations";
pub const MESH_NODES_DOC: &str = "mesh-nodes";
pub const MESH_CONFIG_DOC: &str = "mesh-config";

/// How a membership change was admitted
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeAdmission {
    /// Confirmed by consensus
    Committed,
    /// Applied locally without consensus (offline, consensus disabled, or
    /// not enough healthy nodes to form a quorum yet)
    Provisional,
    /// Consensus did not accept the change; the local application was
    /// undone
    RolledBack { status: RoundStatus },
}

/// Result of a synchronization pass over the offline queue
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SyncReport {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    /// Operations still queued after the pass
    pub remaining: usize,
}

/// Result of a successful self-reconstruction
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ReconstructionReport {
    pub peers_contacted: usize,
    pub peers_responded: usize,
    pub documents_restored: usize,
}

/// Point-in-time view over all three subsystems
#[derive(Clone, Debug)]
pub struct MeshMetrics {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub degraded_nodes: usize,
    pub offline_nodes: usize,
    pub average_latency_ms: f64,
    pub pending_offline_operations: usize,
    pub document_count: usize,
    pub total_operations: u64,
    pub active_rounds: usize,
    pub average_reputation: f64,
    pub byzantine_detections: u64,
    pub last_sync_ms: Option<u64>,
}

/// Membership-change proposal payload
#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode, Debug)]
#[cbor(index_only)]
pub enum MembershipAction {
    #[n(0)]
    Join,
    #[n(1)]
    Leave,
}

#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct MembershipChange {
    #[n(0)]
    pub action: MembershipAction,
    #[n(1)]
    pub node_id: NodeId,
}

impl MembershipChange {
    pub fn to_payload(&self) -> Payload {
        Payload(minicbor::to_vec(self).expect("CBOR encoding should not fail"))
    }

    pub fn from_payload(payload: &Payload) -> Result<Self> {
        minicbor::decode(payload.as_bytes()).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// The resilience orchestrator for one mesh node
pub struct MeshManager {
    config: MeshConfig,
    node_id: NodeId,
    documents: RwLock<DocumentStore>,
    consensus: ConsensusEngine,
    nodes: RwLock<HashMap<NodeId, MeshNode>>,
    offline: RwLock<OfflineQueue>,
    playbooks: RwLock<HashMap<PlaybookId, RecoveryPlaybook>>,
    online: AtomicBool,
    last_sync_ms: AtomicU64,
    transport: Arc<dyn Transport>,
    events: EventBus,
}

impl MeshManager {
    pub fn new(
        config: MeshConfig,
        transport: Arc<dyn Transport>,
        verifier: Arc<dyn VoteVerifier>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let node_id = config.node_id.clone();
        let documents = RwLock::new(DocumentStore::new(node_id.clone(), events.clone()));
        let consensus = ConsensusEngine::new(
            node_id.clone(),
            config.consensus.clone(),
            Arc::clone(&transport),
            verifier,
            events.clone(),
        );
        let playbooks: HashMap<PlaybookId, RecoveryPlaybook> = RecoveryPlaybook::default_catalog()
            .into_iter()
            .map(|p| (p.playbook_id.clone(), p))
            .collect();
        Self {
            config,
            node_id,
            documents,
            consensus,
            nodes: RwLock::new(HashMap::new()),
            offline: RwLock::new(OfflineQueue::new()),
            playbooks: RwLock::new(playbooks),
            online: AtomicBool::new(true),
            last_sync_ms: AtomicU64::new(0),
            transport,
            events,
        }
    }

    /// Create the standard mesh documents: an operation counter, the
    /// member set, and a config register
    pub async fn initialize(&self) -> Result<()> {
        let mut docs = self.documents.write().await;
        docs.create_document(
            DocId::from(MESH_OPERATIONS_DOC),
            DocumentState::Counter(GCounter::new()),
        )?;
        docs.create_document(DocId::from(MESH_NODES_DOC), DocumentState::Set(OrSet::new()))?;
        let config_bytes =
            serde_json::to_vec(&self.config).map_err(|e| Error::Serialization(e.to_string()))?;
        docs.create_document(
            DocId::from(MESH_CONFIG_DOC),
            DocumentState::Register(LwwRegister::new(
                Payload::new(config_bytes),
                self.node_id.clone(),
                now_ms(),
            )),
        )?;
        tracing::info!(node_id = %self.node_id, "mesh initialized");
        Ok(())
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Subscribe to the typed event stream
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    /// Direct access to the document store, the CRDT manager's public
    /// contract
    pub fn documents(&self) -> &RwLock<DocumentStore> {
        &self.documents
    }

    /// Direct access to the consensus engine's public contract
    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    /// Register a node with both subsystems.
    ///
    /// The member-set entry is provisional: when Byzantine tolerance is
    /// enabled and the node is online, the change is proposed for
    /// consensus, and a rejected or timed-out round rolls the local
    /// application back.
    pub async fn register_node(&self, node: MeshNode) -> Result<NodeAdmission> {
        let node_id = node.node_id.clone();
        let member_payload = Payload::from(node_id.as_str());
        // The member-set update is the only fallible part; run it first so
        // a failure leaves no partial registration behind
        self.documents
            .write()
            .await
            .add_to_set(&DocId::from(MESH_NODES_DOC), member_payload.clone())?;
        self.nodes.write().await.insert(node_id.clone(), node.clone());
        self.consensus.register_node(node).await;
        tracing::debug!(%node_id, "node registered");
        self.events.emit(MeshEvent::NodeRegistered {
            node_id: node_id.clone(),
        });

        if !(self.is_online() && self.config.byzantine_tolerance) {
            return Ok(NodeAdmission::Provisional);
        }

        let proposal = MembershipChange {
            action: MembershipAction::Join,
            node_id: node_id.clone(),
        }
        .to_payload();
        match self
            .consensus
            .propose(proposal, self.config.membership_timeout())
            .await
        {
            Ok(outcome) if outcome.accepted() => Ok(NodeAdmission::Committed),
            Ok(outcome) => {
                self.documents
                    .write()
                    .await
                    .remove_from_set(&DocId::from(MESH_NODES_DOC), &member_payload)?;
                self.nodes.write().await.remove(&node_id);
                self.consensus.unregister_node(&node_id).await;
                tracing::warn!(%node_id, status = %outcome.status, "membership change rolled back");
                self.events.emit(MeshEvent::NodeUnregistered {
                    node_id: node_id.clone(),
                });
                Ok(NodeAdmission::RolledBack {
                    status: outcome.status,
                })
            }
            // Not enough healthy nodes to form a quorum yet; common while
            // the mesh bootstraps. The admission stays provisional.
            Err(Error::InsufficientNodes { .. }) => Ok(NodeAdmission::Provisional),
            Err(e) => Err(e),
        }
    }

    /// Remove a node from both subsystems, with the same
    /// provisional-until-confirmed handling as registration
    pub async fn unregister_node(&self, node_id: &NodeId) -> Result<NodeAdmission> {
        if !self.nodes.read().await.contains_key(node_id) {
            return Err(Error::NodeNotRegistered(node_id.clone()));
        }
        let member_payload = Payload::from(node_id.as_str());
        self.documents
            .write()
            .await
            .remove_from_set(&DocId::from(MESH_NODES_DOC), &member_payload)?;
        let Some(node) = self.nodes.write().await.remove(node_id) else {
            return Err(Error::NodeNotRegistered(node_id.clone()));
        };
        self.consensus.unregister_node(node_id).await;
        tracing::debug!(%node_id, "node unregistered");
        self.events.emit(MeshEvent::NodeUnregistered {
            node_id: node_id.clone(),
        });

        if !(self.is_online() && self.config.byzantine_tolerance) {
            return Ok(NodeAdmission::Provisional);
        }

        let proposal = MembershipChange {
            action: MembershipAction::Leave,
            node_id: node_id.clone(),
        }
        .to_payload();
        match self
            .consensus
            .propose(proposal, self.config.membership_timeout())
            .await
        {
            Ok(outcome) if outcome.accepted() => Ok(NodeAdmission::Committed),
            Ok(outcome) => {
                // Put the member back
                self.nodes.write().await.insert(node_id.clone(), node.clone());
                self.consensus.register_node(node).await;
                self.documents
                    .write()
                    .await
                    .add_to_set(&DocId::from(MESH_NODES_DOC), member_payload)?;
                tracing::warn!(%node_id, status = %outcome.status, "membership change rolled back");
                self.events.emit(MeshEvent::NodeRegistered {
                    node_id: node_id.clone(),
                });
                Ok(NodeAdmission::RolledBack {
                    status: outcome.status,
                })
            }
            Err(Error::InsufficientNodes { .. }) => Ok(NodeAdmission::Provisional),
            Err(e) => Err(e),
        }
    }

    /// Ingest a health-probe update for a registered node
    pub async fn update_health(&self, node_id: &NodeId, health: NodeHealth) {
        let known = {
            let mut nodes = self.nodes.write().await;
            match nodes.get_mut(node_id) {
                Some(node) => {
                    node.health = health;
                    true
                }
                None => false,
            }
        };
        if !known {
            tracing::trace!(%node_id, "health update for unknown node ignored");
            return;
        }
        self.consensus.update_health(node_id, health).await;
        self.events.emit(MeshEvent::NodeHealthChanged {
            node_id: node_id.clone(),
            health,
        });
    }

    /// Submit an operation. Online it is propagated immediately; offline
    /// (or when propagation fails) it is queued for the next
    /// synchronization pass. Never blocks on the network outcome beyond
    /// the broadcast call itself.
    pub async fn perform_operation(&self, kind: OperationKind, data: Payload) -> Result<OperationId> {
        let vector_clock = {
            let mut docs = self.documents.write().await;
            docs.increment_counter(&DocId::from(MESH_OPERATIONS_DOC), 1)?;
            docs.clock(&DocId::from(MESH_OPERATIONS_DOC))?.clone()
        };
        let op = OfflineOperation {
            operation_id: OperationId::new(),
            node_id: self.node_id.clone(),
            kind,
            data,
            vector_clock,
            timestamp_ms: now_ms(),
            synced: false,
        };
        let operation_id = op.operation_id;

        if self.is_online() {
            match self.transport.broadcast_operation(&self.node_id, &op).await {
                Ok(()) => {
                    self.events
                        .emit(MeshEvent::OperationSynced { operation_id });
                }
                Err(e) => {
                    tracing::warn!(%operation_id, error = %e, "propagation failed, queueing");
                    self.offline.write().await.enqueue(op)?;
                    self.events
                        .emit(MeshEvent::OperationQueued { operation_id });
                }
            }
        } else {
            self.offline.write().await.enqueue(op)?;
            self.events
                .emit(MeshEvent::OperationQueued { operation_id });
        }
        Ok(operation_id)
    }

    /// Replay every queued operation. Only valid while online; failed
    /// operations stay queued and are reported rather than lost.
    pub async fn synchronize(&self) -> Result<SyncReport> {
        if !self.is_online() {
            return Err(Error::OfflinePartition);
        }

        let pending = self.offline.write().await.take_all();
        let mut report = SyncReport {
            attempted: pending.len(),
            completed: 0,
            failed: 0,
            remaining: 0,
        };

        for mut op in pending {
            match self.transport.broadcast_operation(&self.node_id, &op).await {
                Ok(()) => {
                    op.synced = true;
                    report.completed += 1;
                    self.events.emit(MeshEvent::OperationSynced {
                        operation_id: op.operation_id,
                    });
                }
                Err(e) => {
                    report.failed += 1;
                    self.events.emit(MeshEvent::SyncFailed {
                        operation_id: op.operation_id,
                        reason: e.to_string(),
                    });
                    self.offline.write().await.requeue(op);
                }
            }
        }

        report.remaining = self.offline.read().await.len();
        self.last_sync_ms.store(now_ms(), Ordering::Relaxed);
        tracing::info!(
            attempted = report.attempted,
            completed = report.completed,
            failed = report.failed,
            "synchronization finished"
        );
        Ok(report)
    }

    /// Enter offline mode and mark the partitioned peers unreachable
    pub async fn handle_partition(&self, partitioned: &[NodeId]) {
        self.online.store(false, Ordering::SeqCst);
        for node_id in partitioned {
            self.update_health(node_id, NodeHealth::offline()).await;
        }
        tracing::warn!(nodes = partitioned.len(), "partition detected, queueing operations");
        self.events.emit(MeshEvent::PartitionDetected {
            nodes: partitioned.to_vec(),
        });
    }

    /// Leave offline mode and drain the queue
    pub async fn handle_healing(&self) -> Result<SyncReport> {
        self.online.store(true, Ordering::SeqCst);
        tracing::info!(node_id = %self.node_id, "partition healed");
        self.events.emit(MeshEvent::PartitionHealed {
            node_id: self.node_id.clone(),
        });
        self.synchronize().await
    }

    /// Callback surface for the transport: ingest a vote observed from
    /// the network
    pub async fn receive_vote(&self, vote: ByzantineVote) -> VoteOutcome {
        let voter = vote.voter.clone();
        let outcome = self.consensus.receive_vote(vote).await;
        if matches!(outcome, VoteOutcome::Rejected(_))
            && self.consensus.node_status(&voter).await == Some(NodeStatus::Offline)
        {
            // Mirror an engine-side quarantine into the canonical registry
            if let Some(node) = self.nodes.write().await.get_mut(&voter) {
                node.health.status = NodeStatus::Offline;
            }
        }
        outcome
    }

    /// Callback surface for the transport: merge a peer's document
    /// snapshot, adopting documents we have never seen
    pub async fn merge_remote(&self, snapshot: &StateSnapshot) -> Result<MergeOutcome> {
        let mut docs = self.documents.write().await;
        if docs.contains_document(&snapshot.doc_id) {
            docs.merge(&snapshot.doc_id, &snapshot.data, &snapshot.vector_clock)
        } else {
            docs.import_state(snapshot.clone())?;
            Ok(MergeOutcome::default())
        }
    }

    /// Export one document and hand it to the transport for broadcast
    pub async fn publish_document(&self, doc_id: &DocId) -> Result<()> {
        let snapshot = self.documents.read().await.export_state(doc_id)?;
        self.transport.broadcast_delta(&self.node_id, &snapshot).await
    }

    /// Rebuild local state from healthy peers after catastrophic loss.
    ///
    /// Gated on the configured minimum of online peers; per-document
    /// snapshots must agree by strict majority, and nothing is applied
    /// unless every reported document reconciles.
    pub async fn self_reconstruct(&self) -> Result<ReconstructionReport> {
        if !self.config.reconstruction.enabled {
            return Err(Error::ReconstructionDisabled);
        }

        let peers: Vec<NodeId> = {
            let nodes = self.nodes.read().await;
            nodes
                .values()
                .filter(|n| n.is_online() && n.node_id != self.node_id)
                .map(|n| n.node_id.clone())
                .collect()
        };
        let required = self.config.reconstruction.min_healthy_nodes;
        if peers.len() < required {
            self.events.emit(MeshEvent::ReconstructionFailed {
                reason: format!("insufficient healthy peers: {}/{required}", peers.len()),
            });
            return Err(Error::InsufficientHealthyNodes {
                required,
                available: peers.len(),
            });
        }

        tracing::info!(peers = peers.len(), "reconstruction started");
        self.events.emit(MeshEvent::ReconstructionStarted {
            node_id: self.node_id.clone(),
        });

        let mut by_doc: HashMap<DocId, Vec<StateSnapshot>> = HashMap::new();
        let mut responded = 0usize;
        for peer in &peers {
            match self.transport.request_snapshots(&self.node_id, peer).await {
                Ok(snapshots) => {
                    responded += 1;
                    for snapshot in snapshots {
                        by_doc
                            .entry(snapshot.doc_id.clone())
                            .or_default()
                            .push(snapshot);
                    }
                }
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "snapshot request failed");
                }
            }
        }

        // Reconcile: group identical snapshots by content digest and
        // require a strict majority per document. All-or-nothing: one
        // unreconciled document aborts the whole restore.
        let mut chosen: Vec<StateSnapshot> = Vec::new();
        for (doc_id, snapshots) in &by_doc {
            let mut groups: HashMap<[u8; 32], Vec<&StateSnapshot>> = HashMap::new();
            for snapshot in snapshots {
                groups.entry(snapshot.digest()).or_default().push(snapshot);
            }
            let Some(majority) = groups.values().max_by_key(|group| group.len()) else {
                continue;
            };
            if majority.len() * 2 > snapshots.len() {
                chosen.push(majority[0].clone());
            } else {
                let reason = format!("document {doc_id} split with no majority");
                tracing::warn!(%doc_id, "reconstruction aborted: {reason}");
                self.events
                    .emit(MeshEvent::ReconstructionFailed { reason });
                return Err(Error::UnreconciledSnapshot(doc_id.clone()));
            }
        }

        // Validate everything before touching local state
        for snapshot in &chosen {
            snapshot.data.validate()?;
        }
        {
            let mut docs = self.documents.write().await;
            for snapshot in &chosen {
                docs.import_state(snapshot.clone())?;
            }
        }

        tracing::info!(documents = chosen.len(), "reconstruction complete");
        self.events.emit(MeshEvent::ReconstructionCompleted {
            node_id: self.node_id.clone(),
            documents: chosen.len(),
        });
        Ok(ReconstructionReport {
            peers_contacted: peers.len(),
            peers_responded: responded,
            documents_restored: chosen.len(),
        })
    }

    /// Install or replace a playbook in the catalog
    pub async fn register_playbook(&self, playbook: RecoveryPlaybook) {
        self.playbooks
            .write()
            .await
            .insert(playbook.playbook_id.clone(), playbook);
    }

    /// Highest-priority playbook whose triggers match the event
    pub async fn playbook_for_trigger(&self, event: TriggerEvent) -> Option<RecoveryPlaybook> {
        self.playbooks
            .read()
            .await
            .values()
            .filter(|p| p.matches_trigger(event))
            .max_by_key(|p| p.priority)
            .cloned()
    }

    /// Run a playbook through the host's step runner.
    ///
    /// Steps run sequentially, each within its own timeout and retry
    /// budget. A step marked `rollback_on_failure` that exhausts its
    /// budget unwinds every previously-completed step in reverse order
    /// before the failure is surfaced.
    pub async fn execute_playbook(
        &self,
        playbook_id: &PlaybookId,
        runner: &dyn StepRunner,
    ) -> Result<PlaybookReport> {
        let playbook = self
            .playbooks
            .read()
            .await
            .get(playbook_id)
            .cloned()
            .ok_or_else(|| Error::PlaybookNotFound(playbook_id.clone()))?;

        tracing::info!(%playbook_id, steps = playbook.steps.len(), "playbook execution started");
        self.events.emit(MeshEvent::PlaybookStarted {
            playbook_id: playbook_id.clone(),
        });

        let mut reports: Vec<StepReport> = Vec::new();
        let mut completed: Vec<&crate::mesh::playbook::PlaybookStep> = Vec::new();
        let mut success = true;

        for step in &playbook.steps {
            let mut attempts = 0u32;
            let mut step_ok = false;
            while attempts <= step.retries {
                attempts += 1;
                match tokio::time::timeout(step.timeout(), runner.execute(step)).await {
                    Ok(Ok(())) => {
                        step_ok = true;
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(step = %step.step_id, attempt = attempts, error = %e, "step failed");
                    }
                    Err(_) => {
                        tracing::warn!(step = %step.step_id, attempt = attempts, "step timed out");
                    }
                }
            }

            if step_ok {
                reports.push(StepReport {
                    step_id: step.step_id.clone(),
                    status: StepStatus::Completed,
                    attempts,
                });
                completed.push(step);
                self.events.emit(MeshEvent::PlaybookStepCompleted {
                    playbook_id: playbook_id.clone(),
                    step_id: step.step_id.clone(),
                });
                continue;
            }

            reports.push(StepReport {
                step_id: step.step_id.clone(),
                status: StepStatus::Failed,
                attempts,
            });

            if step.rollback_on_failure {
                for done in completed.iter().rev() {
                    if let Err(e) = runner.rollback(done).await {
                        tracing::warn!(step = %done.step_id, error = %e, "rollback failed");
                    }
                    if let Some(report) = reports.iter_mut().find(|r| r.step_id == done.step_id) {
                        report.status = StepStatus::RolledBack;
                    }
                    self.events.emit(MeshEvent::PlaybookStepRolledBack {
                        playbook_id: playbook_id.clone(),
                        step_id: done.step_id.clone(),
                    });
                }
                tracing::warn!(%playbook_id, step = %step.step_id, "playbook rolled back");
                self.events.emit(MeshEvent::PlaybookFinished {
                    playbook_id: playbook_id.clone(),
                    success: false,
                });
                return Ok(PlaybookReport {
                    playbook_id: playbook_id.clone(),
                    success: false,
                    steps: reports,
                });
            }

            success = false;
        }

        self.events.emit(MeshEvent::PlaybookFinished {
            playbook_id: playbook_id.clone(),
            success,
        });
        Ok(PlaybookReport {
            playbook_id: playbook_id.clone(),
            success,
            steps: reports,
        })
    }

    /// Snapshot of mesh health across all three subsystems
    pub async fn metrics(&self) -> MeshMetrics {
        let (total_nodes, healthy, degraded, offline_nodes, latency_sum) = {
            let nodes = self.nodes.read().await;
            let mut healthy = 0usize;
            let mut degraded = 0usize;
            let mut offline = 0usize;
            let mut latency_sum = 0u64;
            for node in nodes.values() {
                match node.health.status {
                    NodeStatus::Online => healthy += 1,
                    NodeStatus::Degraded => degraded += 1,
                    NodeStatus::Offline => offline += 1,
                }
                latency_sum += u64::from(node.health.network_latency_ms);
            }
            (nodes.len(), healthy, degraded, offline, latency_sum)
        };
        let average_latency_ms = if total_nodes > 0 {
            latency_sum as f64 / total_nodes as f64
        } else {
            0.0
        };

        let consensus_stats = self.consensus.stats().await;
        let crdt_stats = self.documents.read().await.stats();
        let last_sync = self.last_sync_ms.load(Ordering::Relaxed);

        MeshMetrics {
            total_nodes,
            healthy_nodes: healthy,
            degraded_nodes: degraded,
            offline_nodes,
            average_latency_ms,
            pending_offline_operations: self.offline.read().await.len(),
            document_count: crdt_stats.document_count,
            total_operations: crdt_stats.total_operations,
            active_rounds: consensus_stats.active_rounds,
            average_reputation: consensus_stats.average_reputation,
            byzantine_detections: consensus_stats.byzantine_detections,
            last_sync_ms: (last_sync > 0).then_some(last_sync),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::Ed25519Verifier;
    use crate::transport::NullTransport;

    fn test_manager() -> MeshManager {
        let mut config = MeshConfig::new(NodeId::from("n1"));
        config.byzantine_tolerance = false;
        MeshManager::new(
            config,
            Arc::new(NullTransport),
            Arc::new(Ed25519Verifier::new()),
        )
    }

    #[tokio::test]
    async fn test_initialize_creates_standard_documents() {
        let manager = test_manager();
        manager.initialize().await.expect("initialize");

        let docs = manager.documents().read().await;
        assert!(docs.contains_document(&DocId::from(MESH_OPERATIONS_DOC)));
        assert!(docs.contains_document(&DocId::from(MESH_NODES_DOC)));
        assert!(docs.contains_document(&DocId::from(MESH_CONFIG_DOC)));
    }

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        let manager = test_manager();
        manager.initialize().await.expect("initialize");
        assert!(matches!(
            manager.initialize().await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_registration_requires_initialized_documents() {
        let manager = test_manager();
        let result = manager.register_node(MeshNode::new(NodeId::from("n2"))).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_membership_change_payload_round_trip() {
        let change = MembershipChange {
            action: MembershipAction::Join,
            node_id: NodeId::from("n7"),
        };
        let decoded = MembershipChange::from_payload(&change.to_payload()).expect("decode");
        assert_eq!(change, decoded);
    }
}
