//! Orchestrator configuration

use crate::consensus::ConsensusConfig;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Self-reconstruction policy
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ReconstructionConfig {
    pub enabled: bool,
    /// Online peers required before reconstruction may run
    pub min_healthy_nodes: usize,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_healthy_nodes: 2,
        }
    }
}

/// Top-level configuration for a mesh node
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct MeshConfig {
    pub node_id: NodeId,
    pub consensus: ConsensusConfig,
    /// When enabled, membership changes are proposed for consensus before
    /// they are treated as final
    pub byzantine_tolerance: bool,
    pub reconstruction: ReconstructionConfig,
    /// Deadline for membership-change consensus rounds
    pub membership_timeout_ms: u64,
    /// Buffered events per subscriber
    pub event_capacity: usize,
}

impl MeshConfig {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            consensus: ConsensusConfig::default(),
            byzantine_tolerance: true,
            reconstruction: ReconstructionConfig::default(),
            membership_timeout_ms: 10_000,
            event_capacity: 256,
        }
    }

    pub fn membership_timeout(&self) -> Duration {
        Duration::from_millis(self.membership_timeout_ms)
    }
}
