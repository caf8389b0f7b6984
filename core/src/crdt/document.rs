//! General structured document
//!
//! A causally-ordered log of field writes, one entry per operation. Merging
//! unions the logs; reading replays them in a deterministic order that
//! respects causality (clock weight first, then timestamp, node, and
//! operation id). Concurrent writes to the same field are resolved by the
//! replay order and additionally surfaced as conflicts so the caller can
//! see what the tie-break discarded.

use crate::clock::VectorClock;
use crate::types::{NodeId, OperationId, Payload};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One field write in the document's operation log
#[derive(Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize, Debug)]
pub struct FieldWrite {
    #[n(0)]
    pub op_id: OperationId,
    #[n(1)]
    pub node: NodeId,
    /// Clock snapshot taken when the write was issued
    #[n(2)]
    pub clock: VectorClock,
    #[n(3)]
    pub timestamp_ms: u64,
    #[n(4)]
    pub field: String,
    #[n(5)]
    pub value: Payload,
}

impl FieldWrite {
    /// Deterministic total order consistent with causality: if a write
    /// happened before another, its clock weight is strictly smaller.
    fn replay_key(&self) -> (u64, u64, &NodeId, &OperationId) {
        (
            self.clock.weight(),
            self.timestamp_ms,
            &self.node,
            &self.op_id,
        )
    }
}

/// A concurrent-write conflict on a single field
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FieldConflict {
    pub field: String,
    /// The write the deterministic replay resolved to
    pub winner: FieldWrite,
    /// Concurrent writes the tie-break discarded
    pub contenders: Vec<FieldWrite>,
}

#[derive(Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize, Debug)]
#[cbor(transparent)]
pub struct StructuredDocument(#[n(0)] BTreeMap<OperationId, FieldWrite>);

impl StructuredDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, write: FieldWrite) {
        self.0.insert(write.op_id, write);
    }

    /// Union of operation logs, keyed by operation id
    pub fn merge(&mut self, other: &StructuredDocument) {
        for (op_id, write) in &other.0 {
            self.0.entry(*op_id).or_insert_with(|| write.clone());
        }
    }

    /// Materialize the document by replaying all writes in order
    pub fn fields(&self) -> BTreeMap<String, Payload> {
        let mut fields = BTreeMap::new();
        for write in self.ordered_writes() {
            fields.insert(write.field.clone(), write.value.clone());
        }
        fields
    }

    /// Concurrent same-field writes with differing values.
    ///
    /// For each field the causal frontier is the set of writes not
    /// superseded by a later write to that field; a frontier larger than
    /// one distinct value is a conflict.
    pub fn conflicts(&self) -> Vec<FieldConflict> {
        let mut by_field: BTreeMap<&str, Vec<&FieldWrite>> = BTreeMap::new();
        for write in self.0.values() {
            by_field.entry(write.field.as_str()).or_default().push(write);
        }

        let mut conflicts = Vec::new();
        for (field, writes) in by_field {
            let frontier: Vec<&FieldWrite> = writes
                .iter()
                .copied()
                .filter(|w| {
                    !writes
                        .iter()
                        .any(|other| other.op_id != w.op_id && w.clock.happens_before(&other.clock))
                })
                .collect();

            let distinct_values = {
                let mut values: Vec<&Payload> = frontier.iter().map(|w| &w.value).collect();
                values.sort();
                values.dedup();
                values.len()
            };
            if distinct_values < 2 {
                continue;
            }

            let winner = frontier
                .iter()
                .max_by(|a, b| a.replay_key().cmp(&b.replay_key()))
                .copied()
                .cloned();
            if let Some(winner) = winner {
                let contenders = frontier
                    .into_iter()
                    .filter(|w| w.op_id != winner.op_id)
                    .cloned()
                    .collect();
                conflicts.push(FieldConflict {
                    field: field.to_string(),
                    winner,
                    contenders,
                });
            }
        }
        conflicts
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn ordered_writes(&self) -> Vec<&FieldWrite> {
        let mut writes: Vec<&FieldWrite> = self.0.values().collect();
        writes.sort_by(|a, b| a.replay_key().cmp(&b.replay_key()));
        writes
    }
}
