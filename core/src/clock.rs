//! Vector clocks for per-document causal ordering
//!
//! Each replicated document carries one clock: a map from node identity to
//! that node's logical progress. A node only ever advances its own entry,
//! entries never decrease, and merging takes the pointwise maximum.

use crate::types::NodeId;
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Causal relationship between two vector clocks
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClockOrdering {
    Equal,
    /// Self happened strictly before other
    Before,
    /// Self happened strictly after other
    After,
    /// Neither dominates the other
    Concurrent,
}

/// Per-document logical clock
#[derive(Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize, Debug)]
#[cbor(transparent)]
pub struct VectorClock(#[n(0)] BTreeMap<NodeId, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Clock with a single entry, used when a document is first created
    pub fn seeded(node: NodeId, value: u64) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(node, value);
        Self(entries)
    }

    pub fn get(&self, node: &NodeId) -> u64 {
        self.0.get(node).copied().unwrap_or(0)
    }

    /// Advance a node's entry by one and return the new value
    pub fn increment(&mut self, node: &NodeId) -> u64 {
        let entry = self.0.entry(node.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Pointwise maximum merge
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &value) in &other.0 {
            self.0
                .entry(node.clone())
                .and_modify(|v| *v = (*v).max(value))
                .or_insert(value);
        }
    }

    /// Compare two clocks under the happens-before partial order
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        if self == other {
            return ClockOrdering::Equal;
        }
        if self.dominated_by(other) {
            return ClockOrdering::Before;
        }
        if other.dominated_by(self) {
            return ClockOrdering::After;
        }
        ClockOrdering::Concurrent
    }

    /// True when self happened strictly before other
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Before
    }

    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Concurrent
    }

    /// Sum of all entries. Strictly monotone along causal chains, which
    /// makes it a valid primary key for causality-respecting replay order.
    pub fn weight(&self) -> u64 {
        self.0.values().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&NodeId, u64)> {
        self.0.iter().map(|(n, v)| (n, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn dominated_by(&self, other: &VectorClock) -> bool {
        // self ≤ other for all entries, and the clocks differ
        for (node, &value) in &self.0 {
            if value > other.get(node) {
                return false;
            }
        }
        self != other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::from(id)
    }

    #[test]
    fn test_increment_advances_own_entry_only() {
        let mut clock = VectorClock::new();
        assert_eq!(clock.increment(&node("n1")), 1);
        assert_eq!(clock.increment(&node("n1")), 2);
        assert_eq!(clock.get(&node("n1")), 2);
        assert_eq!(clock.get(&node("n2")), 0);
    }

    #[test]
    fn test_happens_before() {
        let mut earlier = VectorClock::new();
        earlier.increment(&node("n1"));

        let mut later = earlier.clone();
        later.increment(&node("n1"));
        later.increment(&node("n2"));

        assert!(earlier.happens_before(&later));
        assert!(!later.happens_before(&earlier));
        assert_eq!(later.compare(&earlier), ClockOrdering::After);
    }

    #[test]
    fn test_concurrent_clocks() {
        let mut a = VectorClock::new();
        a.increment(&node("n1"));

        let mut b = VectorClock::new();
        b.increment(&node("n2"));

        assert!(a.concurrent_with(&b));
        assert!(b.concurrent_with(&a));
    }

    #[test]
    fn test_merge_takes_pointwise_max() {
        let mut a = VectorClock::new();
        a.increment(&node("n1"));
        a.increment(&node("n1"));

        let mut b = VectorClock::new();
        b.increment(&node("n1"));
        b.increment(&node("n2"));

        a.merge(&b);
        assert_eq!(a.get(&node("n1")), 2);
        assert_eq!(a.get(&node("n2")), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut a = VectorClock::new();
        a.increment(&node("n1"));

        let mut b = VectorClock::new();
        b.increment(&node("n2"));

        let mut once = a.clone();
        once.merge(&b);
        let mut twice = once.clone();
        twice.merge(&b);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_weight_is_monotone_along_causal_chains() {
        let mut clock = VectorClock::new();
        let before = clock.weight();
        clock.increment(&node("n1"));
        assert!(clock.weight() > before);
    }

    #[test]
    fn test_cbor_round_trip() {
        let mut clock = VectorClock::new();
        clock.increment(&node("n1"));
        clock.increment(&node("n2"));

        let bytes = minicbor::to_vec(&clock).expect("encode failed");
        let decoded: VectorClock = minicbor::decode(&bytes).expect("decode failed");
        assert_eq!(clock, decoded);
    }
}
