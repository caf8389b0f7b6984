//! Last-write-wins register
//!
//! Holds a single value with the timestamp and node of its latest write. A
//! write only lands with a strictly newer timestamp; timestamp ties are
//! broken by node identity so every replica resolves the same tie the same
//! way.

use crate::types::{NodeId, Payload};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize, Debug)]
pub struct LwwRegister {
    #[n(0)]
    value: Payload,
    #[n(1)]
    timestamp_ms: u64,
    #[n(2)]
    node: NodeId,
}

impl LwwRegister {
    pub fn new(value: Payload, node: NodeId, timestamp_ms: u64) -> Self {
        Self {
            value,
            timestamp_ms,
            node,
        }
    }

    pub fn value(&self) -> &Payload {
        &self.value
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Replace the value if the write is strictly newer. Returns whether
    /// the write landed.
    pub fn set(&mut self, value: Payload, node: NodeId, timestamp_ms: u64) -> bool {
        if timestamp_ms > self.timestamp_ms {
            self.value = value;
            self.timestamp_ms = timestamp_ms;
            self.node = node;
            true
        } else {
            false
        }
    }

    /// Adopt the remote value when it is newer, or on a timestamp tie when
    /// the remote node orders after ours lexicographically.
    pub fn merge(&mut self, other: &LwwRegister) {
        let newer = other.timestamp_ms > self.timestamp_ms
            || (other.timestamp_ms == self.timestamp_ms && other.node > self.node);
        if newer {
            self.value = other.value.clone();
            self.timestamp_ms = other.timestamp_ms;
            self.node = other.node.clone();
        }
    }
}
