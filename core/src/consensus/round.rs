//! Consensus round state machine
//!
//! A round is `Pending` from proposal until it reaches one terminal state:
//! `Accepted`, `Rejected`, or `TimedOut`. Votes are weighted by the
//! voter's reputation, so a recently-misbehaving node still participates
//! but with bounded influence.

use crate::consensus::{ByzantineVote, VoteChoice};
use crate::types::{NodeId, Payload, RoundId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Round lifecycle. Everything but `Pending` is terminal.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum RoundStatus {
    Pending,
    Accepted,
    Rejected,
    /// Deadline passed without a decision. A normal outcome, not an error.
    TimedOut,
}

impl RoundStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RoundStatus::Pending)
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Pending => write!(f, "pending"),
            RoundStatus::Accepted => write!(f, "accepted"),
            RoundStatus::Rejected => write!(f, "rejected"),
            RoundStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// One proposal and the votes gathered for it
#[derive(Clone, Debug)]
pub struct ConsensusRound {
    pub round_id: RoundId,
    pub proposer: NodeId,
    pub proposal: Payload,
    /// Votes in arrival order, at most one per node
    pub votes: Vec<ByzantineVote>,
    /// Votes that must arrive before the round can decide
    pub required_votes: usize,
    /// Size of the healthy voter set when the round opened
    pub eligible_voters: usize,
    pub status: RoundStatus,
    pub started_at_ms: u64,
}

impl ConsensusRound {
    pub fn new(
        round_id: RoundId,
        proposer: NodeId,
        proposal: Payload,
        required_votes: usize,
        eligible_voters: usize,
        started_at_ms: u64,
    ) -> Self {
        Self {
            round_id,
            proposer,
            proposal,
            votes: Vec::new(),
            required_votes,
            eligible_voters,
            status: RoundStatus::Pending,
            started_at_ms,
        }
    }

    pub fn has_vote_from(&self, node: &NodeId) -> bool {
        self.votes.iter().any(|v| &v.voter == node)
    }

    pub fn record_vote(&mut self, vote: ByzantineVote) {
        self.votes.push(vote);
    }

    /// Decide the round if enough votes have arrived.
    ///
    /// Acceptance requires the weighted accept support to reach the quorum
    /// fraction of the total weight: the weight already cast plus, while
    /// voters are still outstanding, one full-weight vote per absent
    /// voter. Counting the uncast weight against acceptance means an early
    /// accept streak can only decide the round once no possible remaining
    /// votes could swing it, so a decision never flips when stragglers
    /// arrive. Rejection requires the weighted rejects to exceed the
    /// accepts. Both transitions are gated on `required_votes` having
    /// arrived.
    pub fn evaluate(&self, quorum: f64) -> Option<RoundStatus> {
        if self.status.is_terminal() || self.votes.len() < self.required_votes {
            return None;
        }

        let (accept_weight, reject_weight) = self.weighted_tally();
        let cast_weight = accept_weight + reject_weight;
        if cast_weight <= 0.0 {
            return None;
        }
        let outstanding = self.eligible_voters.saturating_sub(self.votes.len());
        let total_weight = cast_weight + outstanding as f64;

        if accept_weight / total_weight >= quorum {
            Some(RoundStatus::Accepted)
        } else if reject_weight > accept_weight {
            Some(RoundStatus::Rejected)
        } else {
            None
        }
    }

    /// Sum of vote weights (`reputation / 100`) per choice
    pub fn weighted_tally(&self) -> (f64, f64) {
        let mut accept = 0.0;
        let mut reject = 0.0;
        for vote in &self.votes {
            let weight = f64::from(vote.reputation) / 100.0;
            match vote.choice {
                VoteChoice::Accept => accept += weight,
                VoteChoice::Reject => reject += weight,
            }
        }
        (accept, reject)
    }
}

/// Terminal result of a proposal, returned to the proposer
#[derive(Clone, Debug)]
pub struct ConsensusOutcome {
    pub round_id: RoundId,
    pub status: RoundStatus,
    pub votes: Vec<ByzantineVote>,
}

impl ConsensusOutcome {
    pub fn accepted(&self) -> bool {
        self.status == RoundStatus::Accepted
    }
}
