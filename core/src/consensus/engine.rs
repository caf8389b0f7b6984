//! Reputation-weighted Byzantine consensus engine
//!
//! Runs voting rounds over opaque proposals. The engine owns the active
//! rounds and the reputation ledger, and keeps its own eligibility view of
//! registered nodes; the orchestrator owns the canonical node registry.
//!
//! Proposers suspend on a watch channel that vote arrivals notify
//! directly, with a separate deadline timer. There is no polling loop, and
//! dropping the proposal future only stops the local wait; votes already
//! tallied stay valid.

use crate::consensus::round::{ConsensusOutcome, ConsensusRound, RoundStatus};
use crate::consensus::vote::{ByzantineFault, ByzantineVote, VoteChoice, VoteSigner, VoteVerifier};
use crate::consensus::ReputationLedger;
use crate::events::{EventBus, MeshEvent};
use crate::transport::Transport;
use crate::types::{now_ms, MeshNode, NodeHealth, NodeId, NodeStatus, Payload, RoundId, Signature};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// Byzantine agreement needs at least three participants to tolerate any
/// faulty minority
const MIN_BFT_NODES: usize = 3;

/// Tuning knobs for the consensus engine
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ConsensusConfig {
    /// Minimum healthy nodes before a proposal is allowed (clamped to 3)
    pub min_consensus_nodes: usize,
    /// Weighted fraction of cast weight required to accept
    pub quorum: f64,
    /// Default proposal deadline
    pub vote_timeout_ms: u64,
    /// Reputation subtracted per detected violation
    pub byzantine_penalty: u8,
    /// Reputation added per honest tallied vote
    pub reputation_reward: u8,
    /// Scores below this mark the node offline until restored
    pub quarantine_below: u8,
    /// Minimum score to count as healthy/eligible
    pub healthy_score_floor: u8,
    /// Score seeded at first registration
    pub initial_reputation: u8,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_consensus_nodes: 3,
            quorum: 2.0 / 3.0,
            vote_timeout_ms: 30_000,
            byzantine_penalty: 20,
            reputation_reward: 1,
            quarantine_below: 30,
            healthy_score_floor: 50,
            initial_reputation: 100,
        }
    }
}

impl ConsensusConfig {
    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }
}

/// Disposition of a vote observed from the network. Rejections are
/// recorded as Byzantine events and penalized; stale or unroutable votes
/// are ignored without penalty.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VoteOutcome {
    /// Vote counted toward the round
    Tallied,
    /// Round already reached a terminal state
    RoundClosed,
    /// No such round on this node
    UnknownRound,
    /// Protocol violation, voter penalized
    Rejected(ByzantineFault),
}

/// Aggregate counters over the engine
#[derive(Clone, Debug)]
pub struct ConsensusStats {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub active_rounds: usize,
    pub average_reputation: f64,
    pub byzantine_detections: u64,
}

struct ActiveRound {
    round: ConsensusRound,
    status_tx: watch::Sender<RoundStatus>,
}

pub struct ConsensusEngine {
    node_id: NodeId,
    config: ConsensusConfig,
    members: RwLock<HashMap<NodeId, MeshNode>>,
    reputations: RwLock<ReputationLedger>,
    rounds: RwLock<HashMap<RoundId, ActiveRound>>,
    byzantine_detections: AtomicU64,
    transport: Arc<dyn Transport>,
    verifier: Arc<dyn VoteVerifier>,
    events: EventBus,
}

impl ConsensusEngine {
    pub fn new(
        node_id: NodeId,
        mut config: ConsensusConfig,
        transport: Arc<dyn Transport>,
        verifier: Arc<dyn VoteVerifier>,
        events: EventBus,
    ) -> Self {
        config.min_consensus_nodes = config.min_consensus_nodes.max(MIN_BFT_NODES);
        Self {
            node_id,
            config,
            members: RwLock::new(HashMap::new()),
            reputations: RwLock::new(ReputationLedger::new()),
            rounds: RwLock::new(HashMap::new()),
            byzantine_detections: AtomicU64::new(0),
            transport,
            verifier,
            events,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Add a node to the eligibility view. First registration seeds the
    /// reputation ledger; a rejoining node keeps its earned record.
    pub async fn register_node(&self, node: MeshNode) {
        self.reputations
            .write()
            .await
            .seed(&node.node_id, node.byzantine_score.min(self.config.initial_reputation));
        self.members
            .write()
            .await
            .insert(node.node_id.clone(), node);
    }

    /// Remove a node from eligibility. Its reputation record is retained.
    pub async fn unregister_node(&self, node_id: &NodeId) {
        self.members.write().await.remove(node_id);
    }

    pub async fn update_health(&self, node_id: &NodeId, health: NodeHealth) {
        if let Some(member) = self.members.write().await.get_mut(node_id) {
            member.health = health;
        }
    }

    pub async fn node_status(&self, node_id: &NodeId) -> Option<NodeStatus> {
        self.members
            .read()
            .await
            .get(node_id)
            .map(|m| m.health.status)
    }

    pub async fn reputation(&self, node_id: &NodeId) -> u8 {
        self.reputations.read().await.score(node_id)
    }

    /// External restoration hook: reset a quarantined node's score and
    /// mark it online again
    pub async fn restore_node(&self, node_id: &NodeId, score: u8) {
        self.reputations.write().await.set(node_id, score);
        if let Some(member) = self.members.write().await.get_mut(node_id) {
            member.health.status = NodeStatus::Online;
        }
        tracing::info!(%node_id, score, "node restored from quarantine");
    }

    pub async fn healthy_node_count(&self) -> usize {
        self.healthy_members().await.len()
    }

    /// Open a round, broadcast the proposal, and suspend until the round
    /// reaches a terminal state or the deadline passes.
    ///
    /// Fails with `InsufficientNodes` before any transport activity when
    /// fewer than the configured minimum of nodes are healthy. A deadline
    /// is a normal `TimedOut` outcome, not an error.
    pub async fn propose(&self, proposal: Payload, timeout: Duration) -> Result<ConsensusOutcome> {
        let healthy = self.healthy_members().await;
        if healthy.len() < self.config.min_consensus_nodes {
            return Err(Error::InsufficientNodes {
                required: self.config.min_consensus_nodes,
                available: healthy.len(),
            });
        }

        let required_votes = ((healthy.len() as f64) * self.config.quorum).ceil() as usize;
        let round_id = RoundId::new();
        let (status_tx, mut status_rx) = watch::channel(RoundStatus::Pending);
        let round = ConsensusRound::new(
            round_id,
            self.node_id.clone(),
            proposal.clone(),
            required_votes,
            healthy.len(),
            now_ms(),
        );
        self.rounds
            .write()
            .await
            .insert(round_id, ActiveRound { round, status_tx });

        tracing::debug!(
            %round_id,
            healthy = healthy.len(),
            required_votes,
            "proposal opened"
        );
        self.events.emit(MeshEvent::ProposalBroadcast {
            round_id,
            healthy_nodes: healthy.len(),
        });

        if let Err(e) = self
            .transport
            .broadcast_proposal(&self.node_id, round_id, &proposal)
            .await
        {
            self.rounds.write().await.remove(&round_id);
            return Err(e);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let status = loop {
            match tokio::time::timeout_at(deadline, status_rx.changed()).await {
                Ok(Ok(())) => {
                    let status = *status_rx.borrow();
                    if status.is_terminal() {
                        break status;
                    }
                }
                // Sender dropped: the round was discarded out from under us
                Ok(Err(_)) => break RoundStatus::TimedOut,
                Err(_) => break self.expire_round(round_id).await,
            }
        };

        let votes = self
            .rounds
            .write()
            .await
            .remove(&round_id)
            .map(|active| active.round.votes)
            .unwrap_or_default();

        Ok(ConsensusOutcome {
            round_id,
            status,
            votes,
        })
    }

    /// Cast this node's own vote in an open round. The vote is signed,
    /// tallied locally, and handed to the transport for broadcast.
    pub async fn cast_vote(
        &self,
        round_id: RoundId,
        choice: VoteChoice,
        signer: &dyn VoteSigner,
    ) -> Result<ByzantineVote> {
        let reputation = self.reputations.read().await.score(&self.node_id);
        let mut vote = ByzantineVote {
            voter: self.node_id.clone(),
            round_id,
            choice,
            signature: Signature::zeroed(),
            timestamp_ms: now_ms(),
            reputation,
        };
        vote.signature = signer.sign(&vote.signing_bytes());

        {
            let mut rounds = self.rounds.write().await;
            let active = rounds
                .get_mut(&round_id)
                .ok_or(Error::RoundNotFound(round_id))?;
            if active.round.status.is_terminal() {
                return Err(Error::RoundClosed(round_id));
            }
            if active.round.has_vote_from(&self.node_id) {
                return Err(Error::AlreadyVoted(round_id));
            }
            active.round.record_vote(vote.clone());
            self.finalize_if_decided(active);
        }

        self.events.emit(MeshEvent::VoteTallied {
            round_id,
            voter: self.node_id.clone(),
            choice,
        });
        if let Err(e) = self.transport.broadcast_vote(&self.node_id, &vote).await {
            tracing::warn!(%round_id, error = %e, "vote broadcast failed");
        }
        Ok(vote)
    }

    /// Ingest a vote observed from the network.
    ///
    /// Validation order: round open, voter registered, no prior vote from
    /// the voter, signature valid. The last three failures are Byzantine
    /// events: they penalize the voter's reputation, and enough of them
    /// quarantine the node out of future eligible sets.
    pub async fn receive_vote(&self, vote: ByzantineVote) -> VoteOutcome {
        {
            let rounds = self.rounds.read().await;
            match rounds.get(&vote.round_id) {
                None => return VoteOutcome::UnknownRound,
                Some(active) if active.round.status.is_terminal() => {
                    return VoteOutcome::RoundClosed
                }
                Some(_) => {}
            }
        }

        if !self.members.read().await.contains_key(&vote.voter) {
            self.record_fault(&vote.voter, ByzantineFault::UnknownNode)
                .await;
            return VoteOutcome::Rejected(ByzantineFault::UnknownNode);
        }

        let fault = {
            let mut rounds = self.rounds.write().await;
            let Some(active) = rounds.get_mut(&vote.round_id) else {
                return VoteOutcome::UnknownRound;
            };
            if active.round.status.is_terminal() {
                return VoteOutcome::RoundClosed;
            }
            if active.round.has_vote_from(&vote.voter) {
                Some(ByzantineFault::Equivocation)
            } else if !self.verifier.verify(&vote) {
                Some(ByzantineFault::InvalidSignature)
            } else {
                // Weight by our own ledger, not the self-reported snapshot,
                // so a voter cannot inflate its own influence
                let mut tallied = vote.clone();
                tallied.reputation = self.reputations.read().await.score(&vote.voter);
                active.round.record_vote(tallied);
                self.finalize_if_decided(active);
                None
            }
        };

        match fault {
            Some(fault) => {
                self.record_fault(&vote.voter, fault).await;
                VoteOutcome::Rejected(fault)
            }
            None => {
                self.events.emit(MeshEvent::VoteTallied {
                    round_id: vote.round_id,
                    voter: vote.voter.clone(),
                    choice: vote.choice,
                });
                self.reputations
                    .write()
                    .await
                    .reward(&vote.voter, self.config.reputation_reward);
                VoteOutcome::Tallied
            }
        }
    }

    pub async fn stats(&self) -> ConsensusStats {
        let total_nodes = self.members.read().await.len();
        let healthy_nodes = self.healthy_members().await.len();
        let active_rounds = self.rounds.read().await.len();
        let average_reputation = self.reputations.read().await.average();
        ConsensusStats {
            total_nodes,
            healthy_nodes,
            active_rounds,
            average_reputation,
            byzantine_detections: self.byzantine_detections.load(Ordering::Relaxed),
        }
    }

    /// Registered nodes that are online and above the reputation floor
    async fn healthy_members(&self) -> Vec<NodeId> {
        let members = self.members.read().await;
        let reputations = self.reputations.read().await;
        members
            .values()
            .filter(|m| m.health.status == NodeStatus::Online)
            .filter(|m| reputations.score(&m.node_id) >= self.config.healthy_score_floor)
            .map(|m| m.node_id.clone())
            .collect()
    }

    fn finalize_if_decided(&self, active: &mut ActiveRound) {
        if let Some(status) = active.round.evaluate(self.config.quorum) {
            active.round.status = status;
            let _ = active.status_tx.send(status);
            tracing::info!(round_id = %active.round.round_id, %status, "consensus reached");
            self.events.emit(MeshEvent::ConsensusReached {
                round_id: active.round.round_id,
                accepted: status == RoundStatus::Accepted,
            });
        }
    }

    async fn expire_round(&self, round_id: RoundId) -> RoundStatus {
        let expired = {
            let mut rounds = self.rounds.write().await;
            let Some(active) = rounds.get_mut(&round_id) else {
                return RoundStatus::TimedOut;
            };
            // A vote may have decided the round right at the deadline
            if active.round.status.is_terminal() {
                return active.round.status;
            }
            active.round.status = RoundStatus::TimedOut;
            let _ = active.status_tx.send(RoundStatus::TimedOut);
            true
        };
        if expired {
            tracing::debug!(%round_id, "consensus round timed out");
            self.events.emit(MeshEvent::ConsensusTimedOut { round_id });
        }
        RoundStatus::TimedOut
    }

    async fn record_fault(&self, node_id: &NodeId, fault: ByzantineFault) {
        let score = self
            .reputations
            .write()
            .await
            .penalize(node_id, self.config.byzantine_penalty);
        self.byzantine_detections.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%node_id, %fault, score, "byzantine behavior detected");
        self.events.emit(MeshEvent::ByzantineDetected {
            node_id: node_id.clone(),
            fault,
            score,
        });

        if score < self.config.quarantine_below {
            if let Some(member) = self.members.write().await.get_mut(node_id) {
                member.health.status = NodeStatus::Offline;
            }
            tracing::warn!(%node_id, score, "node quarantined");
            self.events
                .emit(MeshEvent::NodeQuarantined {
                    node_id: node_id.clone(),
                    score,
                });
        }
    }
}
