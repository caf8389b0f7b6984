//! Transport collaborator contract
//!
//! The core never opens sockets. A host supplies a [`Transport`] that
//! delivers document deltas, queued operations, proposals, and votes to
//! peers, and that fetches peer snapshots during self-reconstruction.
//! Delivery is assumed unreliable: at-most-once, possibly reordered.
//!
//! Two implementations ship with the crate: [`NullTransport`] for
//! single-node and fully-offline operation, and [`MemoryTransport`], an
//! inspectable in-process transport used by the integration tests.

use crate::consensus::ByzantineVote;
use crate::crdt::StateSnapshot;
use crate::mesh::OfflineOperation;
use crate::types::{NodeId, Payload, RoundId};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Delivery hooks the core calls into. Inbound traffic flows the other
/// way: the host feeds received votes and deltas back through the
/// orchestrator's `receive_vote` / `merge_remote` surface.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Broadcast a document snapshot to all reachable peers
    async fn broadcast_delta(&self, from: &NodeId, snapshot: &StateSnapshot) -> Result<()>;

    /// Broadcast an operation submitted through the orchestrator
    async fn broadcast_operation(&self, from: &NodeId, operation: &OfflineOperation) -> Result<()>;

    /// Broadcast a consensus proposal to the eligible voter set
    async fn broadcast_proposal(
        &self,
        from: &NodeId,
        round_id: RoundId,
        proposal: &Payload,
    ) -> Result<()>;

    /// Broadcast a locally-cast vote
    async fn broadcast_vote(&self, from: &NodeId, vote: &ByzantineVote) -> Result<()>;

    /// Fetch every document snapshot a peer holds, for reconstruction
    async fn request_snapshots(&self, from: &NodeId, peer: &NodeId) -> Result<Vec<StateSnapshot>>;
}

/// Transport that drops everything. Suitable for single-node hosts and
/// tests that never leave the local replica.
#[derive(Default, Clone, Copy, Debug)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn broadcast_delta(&self, _from: &NodeId, _snapshot: &StateSnapshot) -> Result<()> {
        Ok(())
    }

    async fn broadcast_operation(
        &self,
        _from: &NodeId,
        _operation: &OfflineOperation,
    ) -> Result<()> {
        Ok(())
    }

    async fn broadcast_proposal(
        &self,
        _from: &NodeId,
        _round_id: RoundId,
        _proposal: &Payload,
    ) -> Result<()> {
        Ok(())
    }

    async fn broadcast_vote(&self, _from: &NodeId, _vote: &ByzantineVote) -> Result<()> {
        Ok(())
    }

    async fn request_snapshots(&self, _from: &NodeId, _peer: &NodeId) -> Result<Vec<StateSnapshot>> {
        Ok(Vec::new())
    }
}

/// In-process transport that records every broadcast and serves seeded
/// peer snapshots. Tests inspect the recorded traffic and can make
/// operation broadcasts fail to exercise retry paths.
#[derive(Default)]
pub struct MemoryTransport {
    deltas: Mutex<Vec<StateSnapshot>>,
    operations: Mutex<Vec<OfflineOperation>>,
    proposals: Mutex<Vec<(RoundId, Payload)>>,
    votes: Mutex<Vec<ByzantineVote>>,
    peer_snapshots: Mutex<HashMap<NodeId, Vec<StateSnapshot>>>,
    fail_operations: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent operation broadcasts fail with a transport error
    pub fn set_operation_failure(&self, fail: bool) {
        self.fail_operations.store(fail, Ordering::SeqCst);
    }

    /// Provide the snapshots a peer will answer reconstruction requests
    /// with
    pub fn seed_snapshots(&self, peer: NodeId, snapshots: Vec<StateSnapshot>) {
        lock(&self.peer_snapshots).insert(peer, snapshots);
    }

    pub fn sent_deltas(&self) -> Vec<StateSnapshot> {
        lock(&self.deltas).clone()
    }

    pub fn sent_operations(&self) -> Vec<OfflineOperation> {
        lock(&self.operations).clone()
    }

    pub fn sent_proposals(&self) -> Vec<(RoundId, Payload)> {
        lock(&self.proposals).clone()
    }

    pub fn sent_votes(&self) -> Vec<ByzantineVote> {
        lock(&self.votes).clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn broadcast_delta(&self, _from: &NodeId, snapshot: &StateSnapshot) -> Result<()> {
        lock(&self.deltas).push(snapshot.clone());
        Ok(())
    }

    async fn broadcast_operation(&self, _from: &NodeId, operation: &OfflineOperation) -> Result<()> {
        if self.fail_operations.load(Ordering::SeqCst) {
            return Err(Error::Transport("operation broadcast failed".to_string()));
        }
        lock(&self.operations).push(operation.clone());
        Ok(())
    }

    async fn broadcast_proposal(
        &self,
        _from: &NodeId,
        round_id: RoundId,
        proposal: &Payload,
    ) -> Result<()> {
        lock(&self.proposals).push((round_id, proposal.clone()));
        Ok(())
    }

    async fn broadcast_vote(&self, _from: &NodeId, vote: &ByzantineVote) -> Result<()> {
        lock(&self.votes).push(vote.clone());
        Ok(())
    }

    async fn request_snapshots(&self, _from: &NodeId, peer: &NodeId) -> Result<Vec<StateSnapshot>> {
        Ok(lock(&self.peer_snapshots)
            .get(peer)
            .cloned()
            .unwrap_or_default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
