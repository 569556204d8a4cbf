// SPDX-License-Identifier: MIT
//! Outcome recorder and pattern performance tracker.
//!
//! The execution log is append-only: corrections are new records that
//! reference the original via `corrects`, never in-place edits. Pattern
//! performance is *derived* — always exactly the fold of the effective
//! record history for a pattern, so recomputing it from scratch must (and
//! does) reproduce identical values. There is no other mutation path.

use crate::error::{EngineError, Result};
use crate::storage::Storage;
use crate::tiers::Tier;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

// ─── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    /// Some of the intended change landed; counted as failure for statistics.
    Partial,
    Failed,
    /// Aborted before any mutation (snapshot failure, cap, low confidence).
    Blocked,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Partial => "partial",
            Outcome::Failed => "failed",
            Outcome::Blocked => "blocked",
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "partial" => Ok(Outcome::Partial),
            "failed" => Ok(Outcome::Failed),
            "blocked" => Ok(Outcome::Blocked),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

// ─── ExecutionRecord ──────────────────────────────────────────────────────────

/// One entry in the append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    /// `None` only for manually ingested outcomes (no prior candidate).
    pub candidate_id: Option<String>,
    pub approach_id: Option<String>,
    /// Denormalized from the candidate so performance folds read one table.
    pub pattern_id: Option<String>,
    pub tier: Tier,
    pub approved_by: Option<String>,
    pub dry_run: bool,
    pub snapshot_ref: Option<String>,
    pub confidence_at_execution: Option<f64>,
    pub started_at: String,
    pub completed_at: String,
    pub outcome: Outcome,
    pub errors: Vec<String>,
    /// Threshold config version active at decision time, frozen for analysis.
    pub threshold_version: i64,
    /// Id of the record this one corrects; `None` for base records.
    pub corrects: Option<String>,
}

// ─── PatternPerformance ───────────────────────────────────────────────────────

/// Derived per-pattern statistics. Never hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternPerformance {
    pub pattern_id: String,
    pub usage_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub average_confidence_at_execution: f64,
    pub last_updated: String,
}

// ─── OutcomeRecorder ──────────────────────────────────────────────────────────

pub struct OutcomeRecorder {
    storage: Storage,
}

impl OutcomeRecorder {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Append a correction for an existing execution. The original record is
    /// untouched; the fold treats the latest correction's outcome as
    /// effective. `execution_id` may itself name a correction — the new
    /// record resolves `corrects` to the base record, so chained corrections
    /// all key the same fold entry.
    pub async fn record_outcome(
        &self,
        execution_id: &str,
        outcome: Outcome,
        details: &str,
    ) -> Result<ExecutionRecord> {
        let original = self
            .storage
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?
            .into_record()?;
        let base_id = original
            .corrects
            .clone()
            .unwrap_or_else(|| original.id.clone());

        let now = Utc::now().to_rfc3339();
        let correction = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            candidate_id: original.candidate_id.clone(),
            approach_id: original.approach_id.clone(),
            pattern_id: original.pattern_id.clone(),
            tier: original.tier,
            approved_by: original.approved_by.clone(),
            dry_run: original.dry_run,
            snapshot_ref: None,
            confidence_at_execution: original.confidence_at_execution,
            started_at: now.clone(),
            completed_at: now,
            outcome,
            errors: if details.is_empty() {
                Vec::new()
            } else {
                vec![details.to_string()]
            },
            threshold_version: original.threshold_version,
            corrects: Some(base_id),
        };
        self.storage.insert_execution(&correction).await?;
        info!(
            execution_id,
            correction_id = %correction.id,
            outcome = outcome.as_str(),
            "outcome correction recorded"
        );

        if let Some(pattern_id) = &correction.pattern_id {
            self.recompute_performance(pattern_id).await?;
        }
        Ok(correction)
    }

    /// Ingest an outcome resolved entirely by a human, with no prior
    /// candidate. Seeds (or corrects) a pattern's statistics so the library
    /// can acquire experience for patterns it has no confidence history for.
    pub async fn record_manual_outcome(
        &self,
        pattern_id: &str,
        outcome: Outcome,
        operator: &str,
        details: &str,
        threshold_version: i64,
    ) -> Result<ExecutionRecord> {
        let now = Utc::now().to_rfc3339();
        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            candidate_id: None,
            approach_id: None,
            pattern_id: Some(pattern_id.to_string()),
            tier: Tier::Assisted,
            approved_by: Some(operator.to_string()),
            dry_run: false,
            snapshot_ref: None,
            confidence_at_execution: None,
            started_at: now.clone(),
            completed_at: now,
            outcome,
            errors: if details.is_empty() {
                Vec::new()
            } else {
                vec![details.to_string()]
            },
            threshold_version,
            corrects: None,
        };
        self.storage.insert_execution(&record).await?;
        info!(
            pattern_id,
            outcome = outcome.as_str(),
            operator,
            "manual outcome ingested"
        );
        self.recompute_performance(pattern_id).await?;
        Ok(record)
    }

    /// Fold the full effective history for `pattern_id` into fresh
    /// statistics, upserting the derived row. Idempotent; re-runnable from
    /// scratch as a correctness check.
    ///
    /// Fold rules: dry runs and blocked records carry no usage; `partial`
    /// counts as failure; the average is over base records that carried a
    /// confidence at execution time.
    pub async fn recompute_performance(&self, pattern_id: &str) -> Result<PatternPerformance> {
        let mut base: Vec<ExecutionRecord> = Vec::new();
        let mut overrides: HashMap<String, Outcome> = HashMap::new();
        for row in self.storage.list_executions_for_pattern(pattern_id).await? {
            let record = row.into_record()?;
            match &record.corrects {
                // Rows are ordered oldest-first, so the latest correction wins.
                Some(original) => {
                    overrides.insert(original.clone(), record.outcome);
                }
                None => base.push(record),
            }
        }

        let mut usage = 0u64;
        let mut successes = 0u64;
        let mut failures = 0u64;
        let mut confidence_sum = 0.0;
        let mut confidence_n = 0u64;
        for record in &base {
            if record.dry_run {
                continue;
            }
            let effective = overrides.get(&record.id).copied().unwrap_or(record.outcome);
            match effective {
                Outcome::Blocked => continue,
                Outcome::Success => successes += 1,
                Outcome::Partial | Outcome::Failed => failures += 1,
            }
            usage += 1;
            if let Some(confidence) = record.confidence_at_execution {
                confidence_sum += confidence;
                confidence_n += 1;
            }
        }

        let performance = PatternPerformance {
            pattern_id: pattern_id.to_string(),
            usage_count: usage,
            success_count: successes,
            failure_count: failures,
            average_confidence_at_execution: if confidence_n > 0 {
                confidence_sum / confidence_n as f64
            } else {
                0.0
            },
            last_updated: Utc::now().to_rfc3339(),
        };
        self.storage.upsert_performance(&performance).await?;
        Ok(performance)
    }

    /// Derived statistics for one pattern or all tracked patterns.
    pub async fn get_performance(
        &self,
        pattern_id: Option<&str>,
    ) -> Result<Vec<PatternPerformance>> {
        match pattern_id {
            Some(id) => Ok(self
                .storage
                .get_performance(id)
                .await?
                .map(|row| vec![row.into()])
                .unwrap_or_default()),
            None => Ok(self
                .storage
                .list_performance()
                .await?
                .into_iter()
                .map(Into::into)
                .collect()),
        }
    }
}
