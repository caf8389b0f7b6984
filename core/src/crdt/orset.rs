//! Observed-remove set
//!
//! Every add gets a unique tag. A remove moves the observed tags into a
//! tombstone map instead of deleting them, so a stale remove can never undo
//! an add it has not observed: a concurrent re-add carries a fresh tag that
//! no tombstone covers. Membership is the live tags minus tombstoned tags.

use crate::types::{NodeId, Payload, TagId};
use crate::{Error, Result};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tagged element in the set
#[derive(Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize, Debug)]
pub struct SetElement {
    #[n(0)]
    pub tag: TagId,
    #[n(1)]
    pub value: Payload,
    /// Node that performed the add
    #[n(2)]
    pub node: NodeId,
    #[n(3)]
    pub timestamp_ms: u64,
}

#[derive(Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize, Debug)]
pub struct OrSet {
    #[n(0)]
    live: BTreeMap<TagId, SetElement>,
    #[n(1)]
    tombstones: BTreeMap<TagId, SetElement>,
}

impl OrSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value under a fresh tag and return the tag
    pub fn add(&mut self, value: Payload, node: NodeId, timestamp_ms: u64) -> TagId {
        let tag = TagId::new();
        self.live.insert(
            tag,
            SetElement {
                tag,
                value,
                node,
                timestamp_ms,
            },
        );
        tag
    }

    /// Tombstone every live tag carrying this value, returning how many
    /// tags were removed
    pub fn remove(&mut self, value: &Payload) -> usize {
        let matching: Vec<TagId> = self
            .live
            .iter()
            .filter(|(_, el)| &el.value == value)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in &matching {
            if let Some(element) = self.live.remove(tag) {
                self.tombstones.insert(*tag, element);
            }
        }
        matching.len()
    }

    pub fn contains(&self, value: &Payload) -> bool {
        self.live.values().any(|el| &el.value == value)
    }

    /// Distinct live values, in tag order
    pub fn values(&self) -> Vec<Payload> {
        let mut out: Vec<Payload> = Vec::new();
        for element in self.live.values() {
            if !out.contains(&element.value) {
                out.push(element.value.clone());
            }
        }
        out
    }

    pub fn live_tags(&self) -> impl Iterator<Item = &TagId> {
        self.live.keys()
    }

    pub fn is_tombstoned(&self, tag: &TagId) -> bool {
        self.tombstones.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Union both tombstone sets, then union live entries not covered by a
    /// tombstone. Tombstones win over any add of the same tag.
    pub fn merge(&mut self, other: &OrSet) {
        for (tag, element) in &other.tombstones {
            self.live.remove(tag);
            self.tombstones.insert(*tag, element.clone());
        }
        for (tag, element) in &other.live {
            if !self.tombstones.contains_key(tag) {
                self.live.entry(*tag).or_insert_with(|| element.clone());
            }
        }
    }

    /// Internal consistency check used before merging remote state
    pub fn validate(&self) -> Result<()> {
        for tag in self.live.keys() {
            if self.tombstones.contains_key(tag) {
                return Err(Error::InvalidState(format!(
                    "tag {tag} is both live and tombstoned"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::from(id)
    }

    #[test]
    fn test_add_then_remove() {
        let mut set = OrSet::new();
        let value = Payload::from_text("alpha");
        set.add(value.clone(), node("n1"), 1000);
        assert!(set.contains(&value));

        assert_eq!(set.remove(&value), 1);
        assert!(!set.contains(&value));
        assert!(set.is_empty());
    }

    #[test]
    fn test_concurrent_readd_survives_stale_remove() {
        let value = Payload::from_text("alpha");

        // Replica A adds and removes the element
        let mut a = OrSet::new();
        a.add(value.clone(), node("n1"), 1000);
        a.remove(&value);

        // Replica B re-adds the same value under a fresh tag, having never
        // observed A's tag
        let mut b = OrSet::new();
        let fresh = b.add(value.clone(), node("n2"), 2000);

        a.merge(&b);
        assert!(a.contains(&value));
        assert!(a.live_tags().any(|t| t == &fresh));
    }

    #[test]
    fn test_tombstone_wins_over_same_tag_add() {
        let value = Payload::from_text("alpha");

        let mut a = OrSet::new();
        a.add(value.clone(), node("n1"), 1000);

        // B observed the add, then removed it
        let mut b = a.clone();
        b.remove(&value);

        // Whichever way the merge runs, the tag stays removed
        let mut ab = a.clone();
        ab.merge(&b);
        assert!(!ab.contains(&value));

        let mut ba = b.clone();
        ba.merge(&a);
        assert!(!ba.contains(&value));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut a = OrSet::new();
        a.add(Payload::from_text("alpha"), node("n1"), 1000);

        let mut b = OrSet::new();
        b.add(Payload::from_text("beta"), node("n2"), 1001);
        b.remove(&Payload::from_text("beta"));

        let mut once = a.clone();
        once.merge(&b);
        let mut twice = once.clone();
        twice.merge(&b);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_validate_rejects_overlapping_tag() {
        let mut set = OrSet::new();
        let value = Payload::from_text("alpha");
        let tag = set.add(value.clone(), node("n1"), 1000);
        set.tombstones.insert(
            tag,
            SetElement {
                tag,
                value,
                node: node("n1"),
                timestamp_ms: 1000,
            },
        );
        assert!(set.validate().is_err());
    }
}
