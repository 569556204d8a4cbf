// SPDX-License-Identifier: MIT
//! The snapshot → dry-run → execute → validate → rollback state machine.
//!
//! Every run that enters the workflow yields an `ExecutionRecord`, whatever
//! its outcome. Failure handling follows the fail-closed ladder:
//!
//! - snapshot capture fails → abort before any mutation, outcome `blocked`;
//! - execute/validate fails or times out → automatic rollback from snapshot,
//!   outcome `failed`, terminal state `RolledBack`;
//! - rollback itself fails → terminal state `Escalated`, logged at ERROR and
//!   surfaced as `RollbackFailed` — the only fatal condition in the engine,
//!   never auto-retried.

use super::{ApproachExecutor, ChangeSet, ExecutionState, ResourceLocks, SnapshotStore};
use crate::config::ExecutionConfig;
use crate::error::{EngineError, Result};
use crate::outcomes::{ExecutionRecord, Outcome};
use crate::storage::Storage;
use crate::tiers::Tier;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ─── Plan & outcome ───────────────────────────────────────────────────────────

/// Everything the workflow needs to run one approach, captured at decision
/// time so the audit record is self-contained.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub candidate_id: String,
    pub approach_id: String,
    pub pattern_id: Option<String>,
    pub tier: Tier,
    pub approved_by: Option<String>,
    pub dry_run: bool,
    pub confidence: f64,
    pub threshold_version: i64,
}

/// Result of one workflow run: the audit record, the terminal state, and the
/// change set when the run was a dry-run preview.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub record: ExecutionRecord,
    pub state: ExecutionState,
    pub change_set: Option<ChangeSet>,
}

// ─── SafeWorkflow ─────────────────────────────────────────────────────────────

pub struct SafeWorkflow {
    storage: Storage,
    snapshots: Arc<dyn SnapshotStore>,
    locks: Arc<ResourceLocks>,
    config: ExecutionConfig,
}

impl SafeWorkflow {
    pub fn new(
        storage: Storage,
        snapshots: Arc<dyn SnapshotStore>,
        locks: Arc<ResourceLocks>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            storage,
            snapshots,
            locks,
            config,
        }
    }

    /// Run one approach under the safety state machine.
    ///
    /// Pre-flight rejections (`ResourceBusy`, `ApprovalRequired`) happen
    /// before `Planned` and produce no record; everything after that is
    /// audited. Cancellation is not possible once this returns control to
    /// the executor — the run finishes at `Committed`, `RolledBack`, or
    /// `Escalated`.
    pub async fn run(
        &self,
        plan: ExecutionPlan,
        executor: &dyn ApproachExecutor,
    ) -> Result<WorkflowOutcome> {
        let resource = executor.resource();
        let _guard = self.locks.try_acquire(&resource)?;

        let started_at = Utc::now().to_rfc3339();
        let mut state = ExecutionState::Planned;
        debug!(
            candidate_id = %plan.candidate_id,
            approach_id = %plan.approach_id,
            resource = %resource,
            tier = %plan.tier,
            dry_run = plan.dry_run,
            state = %state,
            "execution planned"
        );

        if plan.dry_run {
            return self.run_dry(plan, executor, started_at).await;
        }

        // Assisted tier never leaves Planned unattended. Dry runs are exempt:
        // they never reach Executing.
        if plan.tier == Tier::Assisted && plan.approved_by.is_none() {
            return Err(EngineError::ApprovalRequired {
                candidate_id: plan.candidate_id,
            });
        }

        // Snapshot before any mutation; failure aborts fail-closed.
        let snapshot_ref = if executor.is_mutating() {
            match self.snapshots.capture(&resource).await {
                Ok(snapshot_ref) => {
                    state = ExecutionState::SnapshotTaken;
                    debug!(resource = %resource, state = %state, "snapshot taken");
                    Some(snapshot_ref)
                }
                Err(e) => {
                    warn!(resource = %resource, err = %e, "snapshot failed; aborting before mutation");
                    let record = self
                        .finish(
                            &plan,
                            &started_at,
                            None,
                            Outcome::Blocked,
                            vec![format!("snapshot failed: {e}")],
                        )
                        .await?;
                    return Ok(WorkflowOutcome {
                        record,
                        state: ExecutionState::Planned,
                        change_set: None,
                    });
                }
            }
        } else {
            state = ExecutionState::SnapshotSkipped;
            debug!(resource = %resource, state = %state, "non-mutating approach; snapshot skipped");
            None
        };

        state = ExecutionState::Executing;
        debug!(resource = %resource, state = %state, "executing");
        let execute_timeout = Duration::from_secs(self.config.execute_timeout_secs);
        let step_failure = match timeout(execute_timeout, executor.execute()).await {
            Ok(Ok(())) => {
                state = ExecutionState::Validating;
                debug!(resource = %resource, state = %state, "validating");
                let validate_timeout = Duration::from_secs(self.config.validate_timeout_secs);
                match timeout(validate_timeout, executor.validate()).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(format!("validation failed: {e}")),
                    Err(_) => Some(format!(
                        "validation timed out after {}s",
                        self.config.validate_timeout_secs
                    )),
                }
            }
            Ok(Err(e)) => Some(format!("execute failed: {e}")),
            Err(_) => Some(format!(
                "execute timed out after {}s",
                self.config.execute_timeout_secs
            )),
        };

        match step_failure {
            None => {
                let record = self
                    .finish(&plan, &started_at, snapshot_ref, Outcome::Success, vec![])
                    .await?;
                info!(
                    execution_id = %record.id,
                    resource = %resource,
                    "execution committed"
                );
                Ok(WorkflowOutcome {
                    record,
                    state: ExecutionState::Committed,
                    change_set: None,
                })
            }
            Some(reason) => {
                self.roll_back(plan, executor, started_at, snapshot_ref, reason)
                    .await
            }
        }
    }

    /// Dry run: compute and return the intended change set without mutating
    /// anything. Terminal for this invocation — no `Executing` transition,
    /// no snapshot, and the record never carries a `snapshot_ref`.
    async fn run_dry(
        &self,
        plan: ExecutionPlan,
        executor: &dyn ApproachExecutor,
        started_at: String,
    ) -> Result<WorkflowOutcome> {
        let preview_timeout = Duration::from_secs(self.config.execute_timeout_secs);
        match timeout(preview_timeout, executor.preview()).await {
            Ok(Ok(change_set)) => {
                let record = self
                    .finish(&plan, &started_at, None, Outcome::Success, vec![])
                    .await?;
                debug!(execution_id = %record.id, "dry run previewed");
                Ok(WorkflowOutcome {
                    record,
                    state: ExecutionState::DryRunPreviewed,
                    change_set: Some(change_set),
                })
            }
            Ok(Err(e)) => {
                let record = self
                    .finish(
                        &plan,
                        &started_at,
                        None,
                        Outcome::Failed,
                        vec![format!("preview failed: {e}")],
                    )
                    .await?;
                Ok(WorkflowOutcome {
                    record,
                    state: ExecutionState::Planned,
                    change_set: None,
                })
            }
            Err(_) => {
                let record = self
                    .finish(
                        &plan,
                        &started_at,
                        None,
                        Outcome::Failed,
                        vec![format!(
                            "preview timed out after {}s",
                            self.config.execute_timeout_secs
                        )],
                    )
                    .await?;
                Ok(WorkflowOutcome {
                    record,
                    state: ExecutionState::Planned,
                    change_set: None,
                })
            }
        }
    }

    async fn roll_back(
        &self,
        plan: ExecutionPlan,
        executor: &dyn ApproachExecutor,
        started_at: String,
        snapshot_ref: Option<String>,
        reason: String,
    ) -> Result<WorkflowOutcome> {
        let resource = executor.resource();
        match &snapshot_ref {
            Some(reference) => match self.snapshots.restore(reference).await {
                Ok(()) => {
                    warn!(resource = %resource, reason = %reason, "rolled back from snapshot");
                    let record = self
                        .finish(
                            &plan,
                            &started_at,
                            snapshot_ref.clone(),
                            Outcome::Failed,
                            vec![reason, "rolled back from snapshot".to_string()],
                        )
                        .await?;
                    Ok(WorkflowOutcome {
                        record,
                        state: ExecutionState::RolledBack,
                        change_set: None,
                    })
                }
                Err(rollback_err) => {
                    let record = self
                        .finish(
                            &plan,
                            &started_at,
                            snapshot_ref.clone(),
                            Outcome::Failed,
                            vec![
                                reason,
                                format!("rollback failed: {rollback_err}"),
                                "escalated: manual intervention required".to_string(),
                            ],
                        )
                        .await?;
                    error!(
                        execution_id = %record.id,
                        resource = %resource,
                        err = %rollback_err,
                        "ROLLBACK FAILED — target may be half-mutated; manual intervention required"
                    );
                    Err(EngineError::RollbackFailed {
                        execution_id: record.id,
                        reason: rollback_err.to_string(),
                    })
                }
            },
            None => {
                // Non-mutating approach: nothing was snapshotted and nothing
                // needs undoing; the failure is recorded as-is.
                let record = self
                    .finish(
                        &plan,
                        &started_at,
                        None,
                        Outcome::Failed,
                        vec![reason, "no snapshot; nothing to roll back".to_string()],
                    )
                    .await?;
                Ok(WorkflowOutcome {
                    record,
                    state: ExecutionState::RolledBack,
                    change_set: None,
                })
            }
        }
    }

    async fn finish(
        &self,
        plan: &ExecutionPlan,
        started_at: &str,
        snapshot_ref: Option<String>,
        outcome: Outcome,
        errors: Vec<String>,
    ) -> Result<ExecutionRecord> {
        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            candidate_id: Some(plan.candidate_id.clone()),
            approach_id: Some(plan.approach_id.clone()),
            pattern_id: plan.pattern_id.clone(),
            tier: plan.tier,
            approved_by: plan.approved_by.clone(),
            dry_run: plan.dry_run,
            snapshot_ref,
            confidence_at_execution: Some(plan.confidence),
            started_at: started_at.to_string(),
            completed_at: Utc::now().to_rfc3339(),
            outcome,
            errors,
            threshold_version: plan.threshold_version,
            corrects: None,
        };
        self.storage.insert_execution(&record).await?;
        Ok(record)
    }
}
