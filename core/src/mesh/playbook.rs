//! Declarative recovery playbooks
//!
//! A playbook is static configuration: trigger conditions plus an ordered
//! list of steps, each with its own timeout, retry budget, and rollback
//! policy. The core executes playbooks through a host-supplied
//! [`StepRunner`]; it does not interpret step actions itself.

use crate::types::PlaybookId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Playbook scheduling priority, lowest to highest
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybookPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Failure classes a playbook can be triggered by
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerEvent {
    NodeFailure,
    Partition,
    DataCorruption,
    ConsensusFailure,
}

/// Event-count threshold over a time window
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct TriggerCondition {
    pub event: TriggerEvent,
    pub threshold: u32,
    pub window_secs: u64,
}

/// One step of a playbook
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct PlaybookStep {
    pub step_id: String,
    /// Action name, interpreted by the host's [`StepRunner`]
    pub action: String,
    pub parameters: BTreeMap<String, String>,
    pub timeout_ms: u64,
    /// Additional attempts after the first failure
    pub retries: u32,
    /// When set, exhausting the retry budget rolls back every
    /// previously-completed step in reverse order
    pub rollback_on_failure: bool,
}

impl PlaybookStep {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A complete recovery playbook
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct RecoveryPlaybook {
    pub playbook_id: PlaybookId,
    pub name: String,
    pub triggers: Vec<TriggerCondition>,
    pub steps: Vec<PlaybookStep>,
    pub priority: PlaybookPriority,
    pub estimated_recovery_secs: u64,
}

impl RecoveryPlaybook {
    /// Built-in playbooks for the common failure classes. Hosts typically
    /// extend or replace these.
    pub fn default_catalog() -> Vec<RecoveryPlaybook> {
        vec![
            RecoveryPlaybook {
                playbook_id: PlaybookId::from("node-failure"),
                name: "Node Failure Recovery".to_string(),
                triggers: vec![TriggerCondition {
                    event: TriggerEvent::NodeFailure,
                    threshold: 1,
                    window_secs: 60,
                }],
                steps: vec![
                    PlaybookStep {
                        step_id: "detect-failure".to_string(),
                        action: "detect-node-failure".to_string(),
                        parameters: BTreeMap::new(),
                        timeout_ms: 10_000,
                        retries: 3,
                        rollback_on_failure: false,
                    },
                    PlaybookStep {
                        step_id: "redistribute-load".to_string(),
                        action: "redistribute-node-load".to_string(),
                        parameters: BTreeMap::new(),
                        timeout_ms: 30_000,
                        retries: 2,
                        rollback_on_failure: true,
                    },
                ],
                priority: PlaybookPriority::Critical,
                estimated_recovery_secs: 60,
            },
            RecoveryPlaybook {
                playbook_id: PlaybookId::from("partition-heal"),
                name: "Partition Healing".to_string(),
                triggers: vec![TriggerCondition {
                    event: TriggerEvent::Partition,
                    threshold: 1,
                    window_secs: 120,
                }],
                steps: vec![
                    PlaybookStep {
                        step_id: "verify-connectivity".to_string(),
                        action: "verify-peer-connectivity".to_string(),
                        parameters: BTreeMap::new(),
                        timeout_ms: 15_000,
                        retries: 2,
                        rollback_on_failure: false,
                    },
                    PlaybookStep {
                        step_id: "resync-state".to_string(),
                        action: "synchronize-offline-queue".to_string(),
                        parameters: BTreeMap::new(),
                        timeout_ms: 60_000,
                        retries: 1,
                        rollback_on_failure: false,
                    },
                ],
                priority: PlaybookPriority::High,
                estimated_recovery_secs: 120,
            },
        ]
    }

    pub fn matches_trigger(&self, event: TriggerEvent) -> bool {
        self.triggers.iter().any(|t| t.event == event)
    }
}

/// Host capability that performs and undoes playbook steps
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn execute(&self, step: &PlaybookStep) -> anyhow::Result<()>;

    /// Undo a previously-completed step. Best effort: errors are logged
    /// by the executor, which continues unwinding.
    async fn rollback(&self, step: &PlaybookStep) -> anyhow::Result<()>;
}

/// Outcome of a single step after the whole playbook ran
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepStatus {
    Completed,
    Failed,
    RolledBack,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StepReport {
    pub step_id: String,
    pub status: StepStatus,
    pub attempts: u32,
}

/// Result of one playbook execution
#[derive(Clone, Debug)]
pub struct PlaybookReport {
    pub playbook_id: PlaybookId,
    pub success: bool,
    pub steps: Vec<StepReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_covers_node_failure_and_partition() {
        let catalog = RecoveryPlaybook::default_catalog();
        assert!(catalog
            .iter()
            .any(|p| p.matches_trigger(TriggerEvent::NodeFailure)));
        assert!(catalog
            .iter()
            .any(|p| p.matches_trigger(TriggerEvent::Partition)));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(PlaybookPriority::Critical > PlaybookPriority::High);
        assert!(PlaybookPriority::High > PlaybookPriority::Medium);
        assert!(PlaybookPriority::Medium > PlaybookPriority::Low);
    }

    #[test]
    fn test_playbook_serde_round_trip() {
        let catalog = RecoveryPlaybook::default_catalog();
        let json = serde_json::to_string(&catalog).expect("serialize failed");
        let decoded: Vec<RecoveryPlaybook> = serde_json::from_str(&json).expect("parse failed");
        assert_eq!(catalog, decoded);
    }
}
