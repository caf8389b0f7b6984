//! Per-node reputation ledger
//!
//! Scores run 0-100. Registration seeds a node's score, detected protocol
//! violations subtract a fixed penalty, and honest tallied votes earn a
//! small reward. The ledger outlives unregistration so a node cannot shed
//! a bad record by leaving and rejoining.

use crate::types::NodeId;
use std::collections::HashMap;

/// Score assumed for nodes the ledger has never seen
const UNSEEN_SCORE: u8 = 50;

#[derive(Default, Debug)]
pub struct ReputationLedger {
    scores: HashMap<NodeId, u8>,
}

impl ReputationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a node's score if it has no record yet
    pub fn seed(&mut self, node: &NodeId, initial: u8) {
        self.scores.entry(node.clone()).or_insert(initial.min(100));
    }

    pub fn score(&self, node: &NodeId) -> u8 {
        self.scores.get(node).copied().unwrap_or(UNSEEN_SCORE)
    }

    /// Subtract a penalty, saturating at zero. Returns the new score.
    pub fn penalize(&mut self, node: &NodeId, amount: u8) -> u8 {
        let entry = self.scores.entry(node.clone()).or_insert(UNSEEN_SCORE);
        *entry = entry.saturating_sub(amount);
        *entry
    }

    /// Add a reward, capped at 100. Returns the new score.
    pub fn reward(&mut self, node: &NodeId, amount: u8) -> u8 {
        let entry = self.scores.entry(node.clone()).or_insert(UNSEEN_SCORE);
        *entry = entry.saturating_add(amount).min(100);
        *entry
    }

    /// Overwrite a score, used by the external restoration hook
    pub fn set(&mut self, node: &NodeId, score: u8) {
        self.scores.insert(node.clone(), score.min(100));
    }

    pub fn average(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        let total: u64 = self.scores.values().map(|&s| u64::from(s)).sum();
        total as f64 / self.scores.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::from(id)
    }

    #[test]
    fn test_seed_does_not_overwrite_earned_score() {
        let mut ledger = ReputationLedger::new();
        ledger.seed(&node("n1"), 100);
        ledger.penalize(&node("n1"), 20);
        // Re-registration keeps the earned record
        ledger.seed(&node("n1"), 100);
        assert_eq!(ledger.score(&node("n1")), 80);
    }

    #[test]
    fn test_penalize_saturates_at_zero() {
        let mut ledger = ReputationLedger::new();
        ledger.seed(&node("n1"), 10);
        assert_eq!(ledger.penalize(&node("n1"), 20), 0);
    }

    #[test]
    fn test_reward_caps_at_hundred() {
        let mut ledger = ReputationLedger::new();
        ledger.seed(&node("n1"), 99);
        assert_eq!(ledger.reward(&node("n1"), 5), 100);
    }

    #[test]
    fn test_unseen_nodes_get_neutral_score() {
        let ledger = ReputationLedger::new();
        assert_eq!(ledger.score(&node("stranger")), UNSEEN_SCORE);
    }

    #[test]
    fn test_average() {
        let mut ledger = ReputationLedger::new();
        ledger.seed(&node("n1"), 100);
        ledger.seed(&node("n2"), 50);
        assert!((ledger.average() - 75.0).abs() < f64::EPSILON);
    }
}
