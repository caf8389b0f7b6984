//! Meshweave Core Library
//!
//! A distributed state-replication and fault-tolerance core for mesh
//! deployments. The library combines conflict-free replicated documents,
//! reputation-weighted Byzantine consensus, and a resilience orchestrator
//! with offline queueing, partition healing, peer-assisted state
//! reconstruction, and declarative recovery playbooks.
//!
//! The core is transport-agnostic: hosts plug in a [`transport::Transport`]
//! for delivery and a [`consensus::VoteVerifier`] for vote authenticity.

pub mod clock;
pub mod consensus;
pub mod crdt;
pub mod events;
pub mod mesh;
pub mod transport;
pub mod types;

pub use types::*;

use crate::types::{DocId, PlaybookId, RoundId};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
///
/// Consensus timeouts are deliberately absent: a round that reaches its
/// deadline resolves to a terminal [`consensus::RoundStatus::TimedOut`]
/// outcome rather than an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("document {0} already exists")]
    AlreadyExists(DocId),

    #[error("document {0} not found")]
    NotFound(DocId),

    #[error("invalid replica state: {0}")]
    InvalidState(String),

    #[error("consensus round {0} not found")]
    RoundNotFound(RoundId),

    #[error("consensus round {0} is no longer open")]
    RoundClosed(RoundId),

    #[error("this node already voted in round {0}")]
    AlreadyVoted(RoundId),

    #[error("node {0} is not registered in the mesh")]
    NodeNotRegistered(types::NodeId),

    #[error("insufficient nodes for consensus: required {required}, available {available}")]
    InsufficientNodes { required: usize, available: usize },

    #[error("insufficient healthy peers for reconstruction: required {required}, available {available}")]
    InsufficientHealthyNodes { required: usize, available: usize },

    #[error("self-reconstruction is disabled by configuration")]
    ReconstructionDisabled,

    #[error("snapshots for document {0} did not reach a majority")]
    UnreconciledSnapshot(DocId),

    #[error("node is partitioned from the mesh")]
    OfflinePartition,

    #[error("offline operation queue is full")]
    QueueFull,

    #[error("recovery playbook {0} not found")]
    PlaybookNotFound(PlaybookId),

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
