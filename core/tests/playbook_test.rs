//! Recovery playbook execution
//!
//! Steps run sequentially with per-step timeouts and retry budgets; a
//! rollback-on-failure step that exhausts its budget unwinds the
//! previously-completed steps in reverse order.

use async_trait::async_trait;
use meshweave_core::consensus::Ed25519Verifier;
use meshweave_core::mesh::{
    MeshConfig, MeshManager, PlaybookPriority, PlaybookStep, RecoveryPlaybook, StepRunner,
    StepStatus, TriggerCondition, TriggerEvent,
};
use meshweave_core::transport::NullTransport;
use meshweave_core::types::{NodeId, PlaybookId};
use meshweave_core::Error;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::Arc;

fn manager() -> MeshManager {
    let mut config = MeshConfig::new(NodeId::from("n1"));
    config.byzantine_tolerance = false;
    MeshManager::new(
        config,
        Arc::new(NullTransport),
        Arc::new(Ed25519Verifier::new()),
    )
}

fn step(id: &str, rollback_on_failure: bool) -> PlaybookStep {
    PlaybookStep {
        step_id: id.to_string(),
        action: format!("action-{id}"),
        parameters: BTreeMap::new(),
        timeout_ms: 1_000,
        retries: 1,
        rollback_on_failure,
    }
}

fn playbook(id: &str, steps: Vec<PlaybookStep>) -> RecoveryPlaybook {
    RecoveryPlaybook {
        playbook_id: PlaybookId::from(id),
        name: id.to_string(),
        triggers: vec![TriggerCondition {
            event: TriggerEvent::NodeFailure,
            threshold: 1,
            window_secs: 60,
        }],
        steps,
        priority: PlaybookPriority::High,
        estimated_recovery_secs: 30,
    }
}

/// Runner that records the order of execute/rollback calls and fails the
/// steps it is told to fail
#[derive(Default)]
struct ScriptedRunner {
    fail_steps: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn failing(steps: &[&str]) -> Self {
        Self {
            fail_steps: steps.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn execute(&self, step: &PlaybookStep) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("lock")
            .push(format!("execute:{}", step.step_id));
        if self.fail_steps.contains(&step.step_id) {
            anyhow::bail!("scripted failure for {}", step.step_id);
        }
        Ok(())
    }

    async fn rollback(&self, step: &PlaybookStep) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("lock")
            .push(format!("rollback:{}", step.step_id));
        Ok(())
    }
}

#[tokio::test]
async fn test_successful_playbook_runs_all_steps_in_order() {
    let manager = manager();
    manager
        .register_playbook(playbook(
            "restore",
            vec![step("one", false), step("two", false), step("three", true)],
        ))
        .await;

    let runner = ScriptedRunner::default();
    let report = manager
        .execute_playbook(&PlaybookId::from("restore"), &runner)
        .await
        .expect("execute");

    assert!(report.success);
    assert_eq!(report.steps.len(), 3);
    assert!(report.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(
        runner.calls(),
        vec!["execute:one", "execute:two", "execute:three"]
    );
}

#[tokio::test]
async fn test_rollback_unwinds_completed_steps_in_reverse() {
    let manager = manager();
    manager
        .register_playbook(playbook(
            "restore",
            vec![step("one", false), step("two", false), step("three", true)],
        ))
        .await;

    let runner = ScriptedRunner::failing(&["three"]);
    let report = manager
        .execute_playbook(&PlaybookId::from("restore"), &runner)
        .await
        .expect("execute");

    assert!(!report.success);
    // Step three was attempted twice (one retry), then the completed
    // steps were rolled back newest-first
    assert_eq!(
        runner.calls(),
        vec![
            "execute:one",
            "execute:two",
            "execute:three",
            "execute:three",
            "rollback:two",
            "rollback:one",
        ]
    );
    assert_eq!(report.steps[0].status, StepStatus::RolledBack);
    assert_eq!(report.steps[1].status, StepStatus::RolledBack);
    assert_eq!(report.steps[2].status, StepStatus::Failed);
    assert_eq!(report.steps[2].attempts, 2);
}

#[tokio::test]
async fn test_non_rollback_failures_continue_but_mark_the_run_failed() {
    let manager = manager();
    manager
        .register_playbook(playbook(
            "restore",
            vec![step("one", false), step("two", false), step("three", false)],
        ))
        .await;

    let runner = ScriptedRunner::failing(&["two"]);
    let report = manager
        .execute_playbook(&PlaybookId::from("restore"), &runner)
        .await
        .expect("execute");

    assert!(!report.success);
    assert_eq!(report.steps[0].status, StepStatus::Completed);
    assert_eq!(report.steps[1].status, StepStatus::Failed);
    // Execution continued past the declared-best-effort failure
    assert_eq!(report.steps[2].status, StepStatus::Completed);
}

#[tokio::test]
async fn test_step_timeout_counts_as_a_failed_attempt() {
    struct HangingRunner;

    #[async_trait]
    impl StepRunner for HangingRunner {
        async fn execute(&self, _step: &PlaybookStep) -> anyhow::Result<()> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(())
        }

        async fn rollback(&self, _step: &PlaybookStep) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let manager = manager();
    let mut hung = step("hang", false);
    hung.timeout_ms = 50;
    hung.retries = 0;
    manager.register_playbook(playbook("hung", vec![hung])).await;

    let report = manager
        .execute_playbook(&PlaybookId::from("hung"), &HangingRunner)
        .await
        .expect("execute");
    assert!(!report.success);
    assert_eq!(report.steps[0].status, StepStatus::Failed);
    assert_eq!(report.steps[0].attempts, 1);
}

#[tokio::test]
async fn test_unknown_playbook_is_an_error() {
    let manager = manager();
    let runner = ScriptedRunner::default();
    assert!(matches!(
        manager
            .execute_playbook(&PlaybookId::from("missing"), &runner)
            .await,
        Err(Error::PlaybookNotFound(_))
    ));
}

#[tokio::test]
async fn test_trigger_lookup_prefers_higher_priority() {
    let manager = manager();
    let mut low = playbook("fallback", vec![step("noop", false)]);
    low.priority = PlaybookPriority::Low;
    manager.register_playbook(low).await;

    // The built-in node-failure playbook is Critical priority
    let chosen = manager
        .playbook_for_trigger(TriggerEvent::NodeFailure)
        .await
        .expect("playbook");
    assert_eq!(chosen.playbook_id, PlaybookId::from("node-failure"));
    assert_eq!(chosen.priority, PlaybookPriority::Critical);
}
