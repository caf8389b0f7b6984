//! Grow-only counter
//!
//! Each node writes only its own entry, so entries are monotone and the
//! pointwise maximum is a safe merge. The counter value is the sum over all
//! entries and never decreases.

use crate::types::NodeId;
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize, Debug)]
#[cbor(transparent)]
pub struct GCounter(#[n(0)] BTreeMap<NodeId, u64>);

impl GCounter {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Advance this node's entry and return the new counter value
    pub fn increment(&mut self, node: &NodeId, amount: u64) -> u64 {
        let entry = self.0.entry(node.clone()).or_insert(0);
        *entry = entry.saturating_add(amount);
        self.value()
    }

    /// Sum of all per-node entries
    pub fn value(&self) -> u64 {
        self.0.values().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    pub fn entry(&self, node: &NodeId) -> u64 {
        self.0.get(node).copied().unwrap_or(0)
    }

    /// Pointwise maximum per node key
    pub fn merge(&mut self, other: &GCounter) {
        for (node, &value) in &other.0 {
            self.0
                .entry(node.clone())
                .and_modify(|v| *v = (*v).max(value))
                .or_insert(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::from(id)
    }

    #[test]
    fn test_value_is_sum_of_entries() {
        let mut counter = GCounter::new();
        counter.increment(&node("n1"), 3);
        counter.increment(&node("n2"), 2);
        assert_eq!(counter.value(), 5);
    }

    #[test]
    fn test_merge_never_decreases() {
        let mut a = GCounter::new();
        a.increment(&node("n1"), 3);

        let mut b = GCounter::new();
        b.increment(&node("n1"), 1);
        b.increment(&node("n2"), 2);

        a.merge(&b);
        // n1 keeps the larger entry, n2 is adopted
        assert_eq!(a.entry(&node("n1")), 3);
        assert_eq!(a.entry(&node("n2")), 2);
        assert_eq!(a.value(), 5);
    }

    #[test]
    fn test_merge_commutes() {
        let mut a = GCounter::new();
        a.increment(&node("n1"), 3);
        let mut b = GCounter::new();
        b.increment(&node("n2"), 2);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
    }
}
