// SPDX-License-Identifier: MIT
//! Engine facade — the contract surface consumed by detectors and hosts.
//!
//! Data flow: `detect` matches signatures against the pattern library and
//! attaches raw factors; `score` aggregates them into a frozen confidence;
//! `classify` routes the candidate into a tier under the daily autonomous
//! cap; `execute` runs the safe workflow for actionable tiers; outcomes feed
//! the performance tracker and, through the calibrator, future threshold
//! versions.
//!
//! All three durable stores (pattern registry, threshold config, execution
//! log) live in one SQLite database under `data_dir`; failure to open it is a
//! hard startup failure — there is no degraded mode.

use crate::calibration::{Calibrator, DriftReport};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::execution::workflow::{ExecutionPlan, SafeWorkflow, WorkflowOutcome};
use crate::execution::{ApproachExecutor, FileSnapshotStore, ResourceLocks, SnapshotStore};
use crate::outcomes::{ExecutionRecord, Outcome, OutcomeRecorder, PatternPerformance};
use crate::patterns::{Pattern, PatternLibrary, Signature};
use crate::scoring::{self, Approach, Candidate, Factor};
use crate::storage::Storage;
use crate::thresholds::{ThresholdConfig, ThresholdDraft, ThresholdStore};
use crate::tiers::{self, DailyCounter, Tier};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

// ─── Inputs ───────────────────────────────────────────────────────────────────

/// One approach proposed by a detector, before ids are assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproachSpec {
    pub description: String,
    pub reversibility: f64,
    pub estimated_complexity: f64,
}

/// A detector submission: what was observed and how it might be resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSignal {
    /// Opaque locator into the detector's domain; also the execution
    /// serialization key for the target resource.
    pub source_ref: String,
    pub signature: Signature,
    #[serde(default)]
    pub approaches: Vec<ApproachSpec>,
    /// How unambiguous the surrounding context is. Opaque to this core —
    /// the detector computes it; absent means unknown (scores 0).
    pub context_clarity: Option<f64>,
}

/// Options for `execute`.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOpts {
    pub dry_run: bool,
    /// Required for assisted-tier execution.
    pub approved_by: Option<String>,
}

/// Supported `export_learning_data` formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(ExportFormat::Json),
            other => Err(EngineError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LearningExport {
    exported_at: String,
    patterns: Vec<Pattern>,
    threshold_configs: Vec<ThresholdConfig>,
    execution_records: Vec<ExecutionRecord>,
    pattern_performance: Vec<PatternPerformance>,
}

// ─── Engine ───────────────────────────────────────────────────────────────────

pub struct Engine {
    config: EngineConfig,
    storage: Storage,
    library: PatternLibrary,
    thresholds: ThresholdStore,
    recorder: OutcomeRecorder,
    calibrator: Calibrator,
    workflow: SafeWorkflow,
    candidates: RwLock<HashMap<String, Candidate>>,
    cancelled: RwLock<HashSet<String>>,
    executors: RwLock<HashMap<String, Arc<dyn ApproachExecutor>>>,
    daily: DailyCounter,
}

impl Engine {
    /// Open (or create) the engine with the file-backed snapshot store.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        let snapshots: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&config.data_dir));
        Self::with_snapshot_store(config, snapshots).await
    }

    /// Open the engine with a host-supplied snapshot store.
    pub async fn with_snapshot_store(
        config: EngineConfig,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        let storage = Storage::new(&config.data_dir).await?;
        let library = PatternLibrary::load(storage.clone()).await?;
        let thresholds = ThresholdStore::load(storage.clone(), &config.thresholds).await?;
        let recorder = OutcomeRecorder::new(storage.clone());
        let calibrator = Calibrator::new(storage.clone(), config.calibration.clone());
        let locks = ResourceLocks::new();
        let workflow = SafeWorkflow::new(
            storage.clone(),
            snapshots,
            locks,
            config.execution.clone(),
        );

        // Seed the cap counter so a restart cannot grant extra autonomous
        // slots for the same day.
        let today = Utc::now().date_naive();
        let used_today = storage.count_autonomous_on(today).await?;
        let daily = DailyCounter::new(today, used_today);
        info!(
            data_dir = %config.data_dir.display(),
            autonomous_used_today = used_today,
            "engine started"
        );

        Ok(Self {
            config,
            storage,
            library,
            thresholds,
            recorder,
            calibrator,
            workflow,
            candidates: RwLock::new(HashMap::new()),
            cancelled: RwLock::new(HashSet::new()),
            executors: RwLock::new(HashMap::new()),
            daily,
        })
    }

    // ─── Pattern registry ───────────────────────────────────────────────────

    pub fn patterns(&self) -> &PatternLibrary {
        &self.library
    }

    pub async fn register_pattern(&self, pattern: Pattern) -> Result<()> {
        self.library.register(pattern).await
    }

    // ─── Detect ─────────────────────────────────────────────────────────────

    /// Turn detector signals into candidates: match each signature against
    /// the library and attach the candidate-level raw factors.
    pub async fn detect(&self, signals: Vec<RawSignal>) -> Result<Vec<Candidate>> {
        let mut out = Vec::with_capacity(signals.len());
        for signal in signals {
            let candidate_id = Uuid::new_v4().to_string();
            let hit = self.library.find_match(&signal.signature).await;

            let mut raw_factors = std::collections::BTreeMap::new();
            raw_factors.insert(
                Factor::PatternMatch,
                hit.as_ref().map(|m| m.quality).unwrap_or(0.0),
            );
            if let Some(clarity) = signal.context_clarity {
                raw_factors.insert(Factor::ContextClarity, clarity);
            }

            let candidate = Candidate {
                id: candidate_id.clone(),
                source_ref: signal.source_ref,
                matched_pattern_id: hit.map(|m| m.pattern.id),
                raw_factors,
                aggregate_confidence: None,
                tier: None,
                approaches: signal
                    .approaches
                    .into_iter()
                    .map(|spec| Approach {
                        id: Uuid::new_v4().to_string(),
                        candidate_id: candidate_id.clone(),
                        description: spec.description,
                        reversibility: spec.reversibility,
                        estimated_complexity: spec.estimated_complexity,
                    })
                    .collect(),
                selected_approach_id: None,
                threshold_version: None,
                warnings: Vec::new(),
                created_at: Utc::now().to_rfc3339(),
            };
            debug!(
                candidate_id = %candidate.id,
                pattern_id = candidate.matched_pattern_id.as_deref().unwrap_or("<first-time>"),
                source_ref = %candidate.source_ref,
                "candidate detected"
            );
            self.candidates
                .write()
                .await
                .insert(candidate.id.clone(), candidate.clone());
            out.push(candidate);
        }
        Ok(out)
    }

    pub async fn get_candidate(&self, candidate_id: &str) -> Option<Candidate> {
        self.candidates.read().await.get(candidate_id).cloned()
    }

    // ─── Score & classify ───────────────────────────────────────────────────

    /// Fill `aggregate_confidence` (idempotent — the first score sticks).
    pub async fn score(&self, candidate_id: &str) -> Result<Candidate> {
        let thresholds = self.thresholds.current().await;
        let mut candidates = self.candidates.write().await;
        let candidate = candidates
            .get_mut(candidate_id)
            .ok_or_else(|| EngineError::CandidateNotFound(candidate_id.to_string()))?;

        let performance = match &candidate.matched_pattern_id {
            Some(pattern_id) => self
                .storage
                .get_performance(pattern_id)
                .await?
                .map(PatternPerformance::from),
            None => None,
        };
        scoring::score_candidate(
            candidate,
            &thresholds,
            performance.as_ref(),
            &self.config.scoring,
        );
        Ok(candidate.clone())
    }

    /// Route the candidate into a tier. An autonomous-eligible candidate
    /// claims a daily slot atomically; when the cap is exhausted it
    /// downgrades to assisted. The decision sticks — re-classifying returns
    /// the stored tier without burning another slot.
    pub async fn classify(&self, candidate_id: &str) -> Result<Tier> {
        self.score(candidate_id).await?;
        let thresholds = self.thresholds.current().await;
        let mut candidates = self.candidates.write().await;
        let candidate = candidates
            .get_mut(candidate_id)
            .ok_or_else(|| EngineError::CandidateNotFound(candidate_id.to_string()))?;
        if let Some(tier) = candidate.tier {
            return Ok(tier);
        }

        let confidence = candidate
            .aggregate_confidence
            .expect("scored above");
        let tentative = tiers::classify(confidence, &thresholds, self.daily.count());
        let tier = if tentative == Tier::Autonomous
            && !self.daily.try_acquire(thresholds.max_autonomous_per_day)
        {
            Tier::Assisted
        } else {
            tentative
        };
        candidate.tier = Some(tier);
        info!(
            candidate_id = %candidate.id,
            confidence,
            tier = %tier,
            "candidate classified"
        );
        Ok(tier)
    }

    // ─── Execute ────────────────────────────────────────────────────────────

    /// Bind the concrete executor that performs `approach_id`. Executors are
    /// external collaborators; the engine only supplies safety around them.
    pub async fn bind_executor(&self, approach_id: &str, executor: Arc<dyn ApproachExecutor>) {
        self.executors
            .write()
            .await
            .insert(approach_id.to_string(), executor);
    }

    /// Run an approach through the safe execution workflow. Scores and
    /// classifies first when the caller has not. Returns the audit record
    /// plus the dry-run change set when applicable.
    pub async fn execute(
        &self,
        candidate_id: &str,
        approach_id: &str,
        opts: ExecuteOpts,
    ) -> Result<WorkflowOutcome> {
        self.classify(candidate_id).await?;

        if self.cancelled.read().await.contains(candidate_id) {
            return Err(EngineError::Cancelled(candidate_id.to_string()));
        }

        let candidate = self
            .get_candidate(candidate_id)
            .await
            .ok_or_else(|| EngineError::CandidateNotFound(candidate_id.to_string()))?;
        let tier = candidate.tier.expect("classified above");
        if !tier.is_actionable() {
            return Err(EngineError::NotActionable {
                candidate_id: candidate_id.to_string(),
                tier: tier.to_string(),
            });
        }
        if candidate.approach(approach_id).is_none() {
            return Err(EngineError::ApproachNotFound {
                candidate_id: candidate_id.to_string(),
                approach_id: approach_id.to_string(),
            });
        }
        let executor = self
            .executors
            .read()
            .await
            .get(approach_id)
            .cloned()
            .ok_or_else(|| EngineError::ExecutorNotBound(approach_id.to_string()))?;

        let plan = ExecutionPlan {
            candidate_id: candidate_id.to_string(),
            approach_id: approach_id.to_string(),
            pattern_id: candidate.matched_pattern_id.clone(),
            tier,
            approved_by: opts.approved_by,
            dry_run: opts.dry_run,
            confidence: candidate.aggregate_confidence.expect("scored above"),
            threshold_version: candidate.threshold_version.expect("scored above"),
        };

        let outcome = self.workflow.run(plan, executor.as_ref()).await;

        // Keep the derived statistics in lockstep with the log, whatever the
        // terminal state was.
        if let Some(pattern_id) = &candidate.matched_pattern_id {
            self.recorder.recompute_performance(pattern_id).await?;
        }
        outcome
    }

    /// Cancel a candidate before execution begins. No side effects; a later
    /// `execute` is rejected. In-flight executions are unaffected — they run
    /// to their terminal state.
    pub async fn cancel(&self, candidate_id: &str) -> Result<()> {
        if self.get_candidate(candidate_id).await.is_none() {
            return Err(EngineError::CandidateNotFound(candidate_id.to_string()));
        }
        self.cancelled
            .write()
            .await
            .insert(candidate_id.to_string());
        info!(candidate_id, "candidate cancelled");
        Ok(())
    }

    // ─── Outcomes & learning ────────────────────────────────────────────────

    pub async fn record_outcome(
        &self,
        execution_id: &str,
        outcome: Outcome,
        details: &str,
    ) -> Result<ExecutionRecord> {
        self.recorder
            .record_outcome(execution_id, outcome, details)
            .await
    }

    /// Ingest an outcome resolved entirely by a human (no prior candidate).
    pub async fn record_manual_outcome(
        &self,
        pattern_id: &str,
        outcome: Outcome,
        operator: &str,
        details: &str,
    ) -> Result<ExecutionRecord> {
        if self.library.get(pattern_id).await.is_none() {
            return Err(EngineError::PatternNotFound(pattern_id.to_string()));
        }
        let version = self.thresholds.current().await.version;
        self.recorder
            .record_manual_outcome(pattern_id, outcome, operator, details, version)
            .await
    }

    pub async fn get_pattern_performance(
        &self,
        pattern_id: Option<&str>,
    ) -> Result<Vec<PatternPerformance>> {
        self.recorder.get_performance(pattern_id).await
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        match self.storage.get_execution(execution_id).await? {
            Some(row) => Ok(Some(row.into_record()?)),
            None => Ok(None),
        }
    }

    // ─── Thresholds & calibration ───────────────────────────────────────────

    pub async fn current_thresholds(&self) -> ThresholdConfig {
        self.thresholds.current().await.as_ref().clone()
    }

    /// Validate and (unless `dry_run`) activate a new threshold version.
    pub async fn adjust_thresholds(
        &self,
        draft: ThresholdDraft,
        dry_run: bool,
    ) -> Result<ThresholdConfig> {
        if dry_run {
            self.thresholds.preview(draft).await
        } else {
            Ok(self.thresholds.commit(draft).await?.as_ref().clone())
        }
    }

    pub async fn compute_drift(&self) -> Result<DriftReport> {
        self.calibrator.compute_drift().await
    }

    pub async fn propose_threshold_adjustment(&self, dry_run: bool) -> Result<ThresholdConfig> {
        self.calibrator
            .propose_threshold_adjustment(&self.thresholds, dry_run)
            .await
    }

    // ─── Export ─────────────────────────────────────────────────────────────

    /// Serialize patterns, outcomes, and performance for external backup or
    /// analysis tooling.
    pub async fn export_learning_data(&self, format: ExportFormat) -> Result<Vec<u8>> {
        let patterns = self.library.list(None, false).await;
        let mut threshold_configs = Vec::new();
        for row in self.storage.list_threshold_configs().await? {
            threshold_configs.push(row.into_config()?);
        }
        let mut execution_records = Vec::new();
        for row in self.storage.list_executions().await? {
            execution_records.push(row.into_record()?);
        }
        let pattern_performance = self.recorder.get_performance(None).await?;

        let export = LearningExport {
            exported_at: Utc::now().to_rfc3339(),
            patterns,
            threshold_configs,
            execution_records,
            pattern_performance,
        };
        match format {
            ExportFormat::Json => Ok(serde_json::to_vec_pretty(&export)?),
        }
    }
}
