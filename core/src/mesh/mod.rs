//! Mesh resilience orchestration
//!
//! The externally-facing surface of the core: node registration with
//! consensus-confirmed membership, offline operation queueing and
//! synchronization, partition handling, peer-assisted self-reconstruction,
//! and recovery playbook execution.

pub mod config;
pub mod manager;
pub mod offline;
pub mod playbook;

pub use config::{MeshConfig, ReconstructionConfig};
pub use manager::{
    MembershipAction, MembershipChange, MeshManager, MeshMetrics, NodeAdmission,
    ReconstructionReport, SyncReport, MESH_CONFIG_DOC, MESH_NODES_DOC, MESH_OPERATIONS_DOC,
};
pub use offline::{OfflineOperation, OfflineQueue};
pub use playbook::{
    PlaybookPriority, PlaybookReport, PlaybookStep, RecoveryPlaybook, StepReport, StepRunner,
    StepStatus, TriggerCondition, TriggerEvent,
};
