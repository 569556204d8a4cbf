// SPDX-License-Identifier: MIT
//! Safe execution workflow.
//!
//! Sub-modules:
//! - `locks`    — per-target-resource in-flight serialization
//! - `snapshot` — recoverable snapshot store (trait + file-backed impl)
//! - `workflow` — the snapshot → dry-run → execute → validate → rollback
//!   state machine producing audit records
//!
//! # State machine
//!
//! ```text
//! Planned ──► SnapshotTaken | SnapshotSkipped ──► (DryRunPreviewed)?
//!                                                      │
//!                                                      ▼
//!                              Executing ──► Validating ──► Committed
//!                                                │
//!                                   (validation failed / timeout)
//!                                                ▼
//!                                      RolledBack | Escalated
//! ```
//!
//! Escalated is the one fatal terminal: rollback from snapshot failed, the
//! target may be in a half-mutated state, and nothing is auto-retried.

pub mod locks;
pub mod snapshot;
pub mod workflow;

pub use locks::ResourceLocks;
pub use snapshot::{FileSnapshotStore, SnapshotStore};
pub use workflow::{ExecutionPlan, SafeWorkflow, WorkflowOutcome};

use serde::{Deserialize, Serialize};

/// Position in the per-execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionState {
    Planned,
    SnapshotTaken,
    SnapshotSkipped,
    DryRunPreviewed,
    Executing,
    Validating,
    Committed,
    RolledBack,
    Escalated,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Planned => "planned",
            ExecutionState::SnapshotTaken => "snapshot_taken",
            ExecutionState::SnapshotSkipped => "snapshot_skipped",
            ExecutionState::DryRunPreviewed => "dry_run_previewed",
            ExecutionState::Executing => "executing",
            ExecutionState::Validating => "validating",
            ExecutionState::Committed => "committed",
            ExecutionState::RolledBack => "rolled_back",
            ExecutionState::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// The intended change set computed by a dry run. Returned to the caller,
/// never applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub resource: String,
    pub summary: String,
    #[serde(default)]
    pub operations: Vec<String>,
}

/// An external executor performing one concrete approach against one target
/// resource. The engine supplies recoverability around it; the executor
/// supplies the mutation, its preview, and its post-condition check.
#[async_trait::async_trait]
pub trait ApproachExecutor: Send + Sync {
    /// Target resource key; executions serialize per distinct value.
    fn resource(&self) -> String;

    /// Whether `execute` mutates the target (mutating approaches require a
    /// snapshot before execution).
    fn is_mutating(&self) -> bool {
        true
    }

    /// Compute the intended change set without mutating anything.
    async fn preview(&self) -> anyhow::Result<ChangeSet>;

    /// Apply the mutation.
    async fn execute(&self) -> anyhow::Result<()>;

    /// Re-check the target's resulting state against expected
    /// post-conditions. An error here triggers automatic rollback.
    async fn validate(&self) -> anyhow::Result<()>;
}
