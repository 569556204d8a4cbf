// SPDX-License-Identifier: MIT
//! Engine error taxonomy.
//!
//! Scoring and classification never return these — missing factors are
//! recovered locally with fail-closed defaults plus a warning annotation on
//! the candidate. Execution-stage failures up through `ValidationFailed` are
//! recovered automatically via rollback and surface only in the audit trail.
//! `RollbackFailed` is the single unrecoverable variant: it is logged at
//! ERROR, escalated, and never auto-retried.

/// Errors returned by the engine and its components.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Threshold bands must satisfy `report_only_max < assisted_mode_min ≤ auto_execute_threshold ≤ 1`.
    #[error("invalid threshold ordering: report_only_max {report_only_max}, assisted_mode_min {assisted_mode_min}, auto_execute_threshold {auto_execute_threshold}")]
    InvalidThresholdOrdering {
        report_only_max: f64,
        assisted_mode_min: f64,
        auto_execute_threshold: f64,
    },

    /// An execution is already in flight for this target resource.
    #[error("resource busy: an execution is already in flight for {resource}")]
    ResourceBusy { resource: String },

    /// Snapshot capture failed before any mutation occurred.
    #[error("snapshot failed for {resource}: {reason}")]
    SnapshotFailed { resource: String, reason: String },

    /// Post-execution validation failed (or timed out); rollback was triggered.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Rollback from snapshot failed. Fatal — requires manual intervention.
    #[error("rollback failed for execution {execution_id}: {reason}")]
    RollbackFailed {
        execution_id: String,
        reason: String,
    },

    /// Assisted-tier execution attempted without an approver.
    #[error("approval required: assisted-tier execution of candidate {candidate_id} needs approved_by")]
    ApprovalRequired { candidate_id: String },

    /// Pattern registration conflict.
    #[error("duplicate pattern id: {0}")]
    DuplicateId(String),

    /// Pattern id not present in the registry.
    #[error("pattern not found: {0}")]
    PatternNotFound(String),

    /// Candidate id unknown to the engine.
    #[error("candidate not found: {0}")]
    CandidateNotFound(String),

    /// Approach id not attached to the given candidate.
    #[error("approach {approach_id} not found on candidate {candidate_id}")]
    ApproachNotFound {
        candidate_id: String,
        approach_id: String,
    },

    /// Execution id not present in the audit log.
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// No executor has been bound for the approach being executed.
    #[error("no executor bound for approach {0}")]
    ExecutorNotBound(String),

    /// Execute called on a candidate classified below the actionable tiers.
    #[error("candidate {candidate_id} is {tier}: not actionable")]
    NotActionable { candidate_id: String, tier: String },

    /// The candidate was cancelled before execution began.
    #[error("candidate {0} was cancelled")]
    Cancelled(String),

    /// A matcher failed to compile (bad regex, empty structural predicate).
    #[error("invalid matcher for pattern {pattern_id}: {reason}")]
    InvalidMatcher { pattern_id: String, reason: String },

    /// Factor weights must be non-negative and sum to 1.
    #[error("invalid factor weights: {0}")]
    InvalidWeights(String),

    /// Unknown export format requested.
    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
