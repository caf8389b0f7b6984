//! Byzantine fault tolerance
//!
//! Reputation-weighted quorum voting over opaque proposals:
//! - Vote types and the pluggable signature capability
//! - The per-round state machine with weighted tallies
//! - The reputation ledger with penalties and quarantine
//! - The engine coordinating rounds, deadlines, and Byzantine detection

pub mod engine;
pub mod reputation;
pub mod round;
pub mod vote;

pub use engine::{ConsensusConfig, ConsensusEngine, ConsensusStats, VoteOutcome};
pub use reputation::ReputationLedger;
pub use round::{ConsensusOutcome, ConsensusRound, RoundStatus};
pub use vote::{
    ByzantineFault, ByzantineVote, Ed25519Signer, Ed25519Verifier, VoteChoice, VoteSigner,
    VoteVerifier,
};
