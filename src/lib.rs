// SPDX-License-Identifier: MIT
//! opsgate — confidence-gated autonomous operation engine.
//!
//! Decides whether a proposed automated change should run unattended, run
//! with human approval, or merely be reported. Detectors submit candidates;
//! the engine scores them from weighted factors, routes them into an
//! execution tier under a daily autonomous cap, executes mutating actions
//! behind snapshot/rollback, and recalibrates its thresholds from recorded
//! outcomes.

pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod outcomes;
pub mod patterns;
pub mod scoring;
pub mod storage;
pub mod thresholds;
pub mod tiers;

pub use calibration::{Calibrator, DriftEntry, DriftReport};
pub use config::EngineConfig;
pub use engine::{ApproachSpec, Engine, ExecuteOpts, ExportFormat, RawSignal};
pub use error::{EngineError, Result};
pub use execution::{
    ApproachExecutor, ChangeSet, ExecutionState, FileSnapshotStore, SafeWorkflow, SnapshotStore,
    WorkflowOutcome,
};
pub use outcomes::{ExecutionRecord, Outcome, OutcomeRecorder, PatternPerformance};
pub use patterns::{Pattern, PatternLibrary, PatternMatch, Severity, Signature, SignatureMatcher};
pub use scoring::{Approach, Candidate, Factor};
pub use thresholds::{FactorWeights, ThresholdConfig, ThresholdDraft, ThresholdStore};
pub use tiers::{classify, DailyCounter, Tier};
