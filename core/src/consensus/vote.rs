//! Votes and the signature capability
//!
//! Votes are immutable once cast. Authenticity is delegated to a
//! [`VoteVerifier`] capability; the crate ships an Ed25519 implementation
//! over the vote's canonical CBOR signing bytes, and hosts may substitute
//! their own scheme.

use crate::types::{NodeId, RoundId, Signature};
use crate::{Error, Result};
use ed25519_dalek::{Signer, Verifier};
use minicbor::{Decode, Encode};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Accept or reject a proposal
#[derive(Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize, Debug)]
#[cbor(index_only)]
pub enum VoteChoice {
    #[n(0)]
    Accept,
    #[n(1)]
    Reject,
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteChoice::Accept => write!(f, "accept"),
            VoteChoice::Reject => write!(f, "reject"),
        }
    }
}

/// A vote in a consensus round
#[derive(Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize, Debug)]
pub struct ByzantineVote {
    #[n(0)]
    pub voter: NodeId,
    #[n(1)]
    pub round_id: RoundId,
    #[n(2)]
    pub choice: VoteChoice,
    /// Signature over [`ByzantineVote::signing_bytes`]
    #[n(3)]
    pub signature: Signature,
    #[n(4)]
    pub timestamp_ms: u64,
    /// Voter's reputation snapshot at cast time
    #[n(5)]
    pub reputation: u8,
}

impl ByzantineVote {
    /// Canonical bytes covered by the signature: everything except the
    /// signature itself and the reputation snapshot (which the tallying
    /// node re-derives from its own ledger)
    pub fn signing_bytes(&self) -> Vec<u8> {
        #[derive(Encode)]
        struct SigningData<'a> {
            #[n(0)]
            voter: &'a NodeId,
            #[n(1)]
            round_id: &'a RoundId,
            #[n(2)]
            choice: VoteChoice,
            #[n(3)]
            timestamp_ms: u64,
        }

        let data = SigningData {
            voter: &self.voter,
            round_id: &self.round_id,
            choice: self.choice,
            timestamp_ms: self.timestamp_ms,
        };
        minicbor::to_vec(&data).expect("CBOR encoding should not fail")
    }
}

/// Protocol violations detected while ingesting votes
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ByzantineFault {
    /// Vote from a node that was never registered
    UnknownNode,
    /// Second vote from the same node in the same round
    Equivocation,
    /// Signature did not verify against the voter's key
    InvalidSignature,
}

impl fmt::Display for ByzantineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByzantineFault::UnknownNode => write!(f, "unknown node"),
            ByzantineFault::Equivocation => write!(f, "equivocation"),
            ByzantineFault::InvalidSignature => write!(f, "invalid signature"),
        }
    }
}

/// Vote authenticity capability
pub trait VoteVerifier: Send + Sync {
    fn verify(&self, vote: &ByzantineVote) -> bool;
}

/// Local signing capability for casting this node's votes
pub trait VoteSigner: Send + Sync {
    fn sign(&self, message: &[u8]) -> Signature;
}

/// Ed25519 keypair for vote signing
#[derive(Clone)]
pub struct Ed25519Signer {
    inner: ed25519_dalek::SigningKey,
}

impl Ed25519Signer {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut rng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Public key bytes, registered with peers' verifiers
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.inner.verifying_key().to_bytes()
    }
}

impl VoteSigner for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.inner.sign(message).to_bytes())
    }
}

/// Ed25519 verifier backed by a directory of per-node public keys
#[derive(Default)]
pub struct Ed25519Verifier {
    keys: RwLock<HashMap<NodeId, ed25519_dalek::VerifyingKey>>,
}

impl Ed25519Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a node's public key
    pub fn register_key(&self, node_id: NodeId, public_key: &[u8; 32]) -> Result<()> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(public_key)
            .map_err(|e| Error::InvalidState(format!("invalid public key: {e}")))?;
        self.keys
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(node_id, key);
        Ok(())
    }

    pub fn remove_key(&self, node_id: &NodeId) {
        self.keys
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(node_id);
    }
}

impl VoteVerifier for Ed25519Verifier {
    fn verify(&self, vote: &ByzantineVote) -> bool {
        let keys = self
            .keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(key) = keys.get(&vote.voter) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&vote.signature.0);
        key.verify(&vote.signing_bytes(), &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_ms;

    fn signed_vote(signer: &Ed25519Signer, voter: &str) -> ByzantineVote {
        let mut vote = ByzantineVote {
            voter: NodeId::from(voter),
            round_id: RoundId::new(),
            choice: VoteChoice::Accept,
            signature: Signature::zeroed(),
            timestamp_ms: now_ms(),
            reputation: 100,
        };
        vote.signature = signer.sign(&vote.signing_bytes());
        vote
    }

    #[test]
    fn test_valid_signature_verifies() {
        let signer = Ed25519Signer::generate();
        let verifier = Ed25519Verifier::new();
        verifier
            .register_key(NodeId::from("n1"), &signer.public_key_bytes())
            .expect("register failed");

        let vote = signed_vote(&signer, "n1");
        assert!(verifier.verify(&vote));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = Ed25519Signer::generate();
        let other = Ed25519Signer::generate();
        let verifier = Ed25519Verifier::new();
        verifier
            .register_key(NodeId::from("n1"), &other.public_key_bytes())
            .expect("register failed");

        let vote = signed_vote(&signer, "n1");
        assert!(!verifier.verify(&vote));
    }

    #[test]
    fn test_unknown_voter_fails() {
        let signer = Ed25519Signer::generate();
        let verifier = Ed25519Verifier::new();
        let vote = signed_vote(&signer, "n1");
        assert!(!verifier.verify(&vote));
    }

    #[test]
    fn test_tampered_vote_fails() {
        let signer = Ed25519Signer::generate();
        let verifier = Ed25519Verifier::new();
        verifier
            .register_key(NodeId::from("n1"), &signer.public_key_bytes())
            .expect("register failed");

        let mut vote = signed_vote(&signer, "n1");
        vote.choice = VoteChoice::Reject;
        assert!(!verifier.verify(&vote));
    }

    #[test]
    fn test_vote_cbor_round_trip() {
        let signer = Ed25519Signer::generate();
        let vote = signed_vote(&signer, "n1");
        let bytes = minicbor::to_vec(&vote).expect("encode failed");
        let decoded: ByzantineVote = minicbor::decode(&bytes).expect("decode failed");
        assert_eq!(vote, decoded);
    }
}
