// SPDX-License-Identifier: MIT
//! Calibrator — detects calibration drift and proposes threshold changes.
//!
//! Drift compares, per pattern, the confidence the scorer *predicted* at
//! execution time against the success rate actually observed since. A large
//! persistent divergence means the weights or base confidences are
//! miscalibrated for that pattern.
//!
//! Threshold proposals are computed from aggregate autonomous-tier outcomes
//! and go through the versioned store, so past execution records keep the
//! `threshold_version` they were decided under — later analysis is never
//! contaminated by retroactive reclassification.

use crate::config::CalibrationConfig;
use crate::error::Result;
use crate::outcomes::Outcome;
use crate::storage::Storage;
use crate::thresholds::{ThresholdConfig, ThresholdDraft, ThresholdStore};
use crate::tiers::Tier;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

// ─── Drift report ─────────────────────────────────────────────────────────────

/// Per-pattern calibration divergence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftEntry {
    pub pattern_id: String,
    /// Effective outcomes contributing to the comparison.
    pub samples: u64,
    pub mean_predicted_confidence: f64,
    pub actual_success_rate: f64,
    /// |predicted − actual|.
    pub drift: f64,
    /// Exceeds the configured drift threshold with enough samples.
    pub flagged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub computed_at: String,
    /// Usage-weighted mean drift across eligible patterns.
    pub overall_drift: f64,
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    pub fn flagged(&self) -> impl Iterator<Item = &DriftEntry> {
        self.entries.iter().filter(|e| e.flagged)
    }
}

// ─── Fold helpers ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct PatternStats {
    samples: u64,
    successes: u64,
    confidence_sum: f64,
    confidence_n: u64,
}

#[derive(Default)]
struct AutonomousStats {
    samples: u64,
    failures: u64,
}

// ─── Calibrator ───────────────────────────────────────────────────────────────

pub struct Calibrator {
    storage: Storage,
    config: CalibrationConfig,
}

impl Calibrator {
    pub fn new(storage: Storage, config: CalibrationConfig) -> Self {
        Self { storage, config }
    }

    /// Fold the execution log into effective per-pattern and autonomous-tier
    /// statistics, applying outcome corrections (latest correction wins) and
    /// skipping dry runs and blocked records — the same effective-history
    /// rules as the performance tracker.
    async fn fold_effective(
        &self,
    ) -> Result<(HashMap<String, PatternStats>, AutonomousStats)> {
        let mut base = Vec::new();
        let mut overrides: HashMap<String, Outcome> = HashMap::new();
        for row in self.storage.list_executions().await? {
            let record = row.into_record()?;
            match &record.corrects {
                Some(original) => {
                    overrides.insert(original.clone(), record.outcome);
                }
                None => base.push(record),
            }
        }

        let mut per_pattern: HashMap<String, PatternStats> = HashMap::new();
        let mut autonomous = AutonomousStats::default();
        for record in base {
            if record.dry_run {
                continue;
            }
            let effective = overrides.get(&record.id).copied().unwrap_or(record.outcome);
            if effective == Outcome::Blocked {
                continue;
            }
            let success = effective == Outcome::Success;

            if let Some(pattern_id) = &record.pattern_id {
                let stats = per_pattern.entry(pattern_id.clone()).or_default();
                stats.samples += 1;
                if success {
                    stats.successes += 1;
                }
                if let Some(confidence) = record.confidence_at_execution {
                    stats.confidence_sum += confidence;
                    stats.confidence_n += 1;
                }
            }
            if record.tier == Tier::Autonomous {
                autonomous.samples += 1;
                if !success {
                    autonomous.failures += 1;
                }
            }
        }
        Ok((per_pattern, autonomous))
    }

    /// Compare predicted confidence against observed success rate per
    /// pattern. Patterns without a recorded prediction (purely manual
    /// history) are skipped — there is nothing to calibrate against.
    pub async fn compute_drift(&self) -> Result<DriftReport> {
        let (per_pattern, _) = self.fold_effective().await?;

        let mut entries: Vec<DriftEntry> = Vec::new();
        for (pattern_id, stats) in per_pattern {
            if stats.confidence_n == 0 {
                continue;
            }
            let mean_predicted = stats.confidence_sum / stats.confidence_n as f64;
            let actual = stats.successes as f64 / stats.samples as f64;
            let drift = (mean_predicted - actual).abs();
            let flagged =
                stats.samples >= self.config.min_samples && drift > self.config.drift_threshold;
            if flagged {
                warn!(
                    pattern_id = %pattern_id,
                    mean_predicted,
                    actual_success_rate = actual,
                    drift,
                    "calibration drift detected"
                );
            }
            entries.push(DriftEntry {
                pattern_id,
                samples: stats.samples,
                mean_predicted_confidence: mean_predicted,
                actual_success_rate: actual,
                drift,
                flagged,
            });
        }
        entries.sort_by(|a, b| a.pattern_id.cmp(&b.pattern_id));

        let eligible: Vec<&DriftEntry> = entries
            .iter()
            .filter(|e| e.samples >= self.config.min_samples)
            .collect();
        let weight: u64 = eligible.iter().map(|e| e.samples).sum();
        let overall_drift = if weight > 0 {
            eligible
                .iter()
                .map(|e| e.drift * e.samples as f64)
                .sum::<f64>()
                / weight as f64
        } else {
            0.0
        };

        Ok(DriftReport {
            computed_at: Utc::now().to_rfc3339(),
            overall_drift,
            entries,
        })
    }

    /// Produce a new threshold config candidate from aggregate statistics.
    ///
    /// Autonomous-tier failure rate above the ceiling raises
    /// `auto_execute_threshold` by one step (capped at 1.0); a rate under
    /// half the ceiling relaxes it by one step, never below
    /// `assisted_mode_min`. With `dry_run = true` the candidate is returned
    /// without touching the live config.
    pub async fn propose_threshold_adjustment(
        &self,
        thresholds: &ThresholdStore,
        dry_run: bool,
    ) -> Result<ThresholdConfig> {
        let (_, autonomous) = self.fold_effective().await?;
        let current = thresholds.current().await;
        let mut draft = ThresholdDraft::from(current.as_ref());

        if autonomous.samples >= self.config.min_samples {
            let failure_rate = autonomous.failures as f64 / autonomous.samples as f64;
            if failure_rate > self.config.failure_rate_ceiling {
                draft.auto_execute_threshold =
                    (draft.auto_execute_threshold + self.config.adjustment_step).min(1.0);
                info!(
                    failure_rate,
                    new_threshold = draft.auto_execute_threshold,
                    "autonomous failure rate above ceiling; proposing raise"
                );
            } else if failure_rate < self.config.failure_rate_ceiling / 2.0 {
                draft.auto_execute_threshold = (draft.auto_execute_threshold
                    - self.config.adjustment_step)
                    .max(draft.assisted_mode_min);
                info!(
                    failure_rate,
                    new_threshold = draft.auto_execute_threshold,
                    "autonomous failure rate well under ceiling; proposing relaxation"
                );
            }
        }

        if dry_run {
            thresholds.preview(draft).await
        } else {
            Ok(thresholds.commit(draft).await?.as_ref().clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdDefaults;
    use crate::outcomes::ExecutionRecord;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn record(pattern_id: &str, tier: Tier, outcome: Outcome, confidence: f64) -> ExecutionRecord {
        let now = Utc::now().to_rfc3339();
        ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            candidate_id: Some("cand".to_string()),
            approach_id: Some("app".to_string()),
            pattern_id: Some(pattern_id.to_string()),
            tier,
            approved_by: None,
            dry_run: false,
            snapshot_ref: None,
            confidence_at_execution: Some(confidence),
            started_at: now.clone(),
            completed_at: now,
            outcome,
            errors: Vec::new(),
            threshold_version: 1,
            corrects: None,
        }
    }

    async fn setup() -> (TempDir, Storage, Calibrator) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let calibrator = Calibrator::new(storage.clone(), CalibrationConfig::default());
        (dir, storage, calibrator)
    }

    #[tokio::test]
    async fn overconfident_pattern_is_flagged() {
        let (_dir, storage, calibrator) = setup().await;
        // Predicted ~0.9 but only 2/6 succeed: drift ≈ 0.57.
        for i in 0..6 {
            let outcome = if i < 2 { Outcome::Success } else { Outcome::Failed };
            storage
                .insert_execution(&record("p-hot", Tier::Autonomous, outcome, 0.9))
                .await
                .unwrap();
        }
        let report = calibrator.compute_drift().await.unwrap();
        let entry = report
            .entries
            .iter()
            .find(|e| e.pattern_id == "p-hot")
            .unwrap();
        assert!(entry.flagged);
        assert!(entry.drift > 0.5);
        assert!(report.overall_drift > 0.5);
    }

    #[tokio::test]
    async fn well_calibrated_pattern_is_not_flagged() {
        let (_dir, storage, calibrator) = setup().await;
        // Predicted ~0.8 and 4/5 succeed.
        for i in 0..5 {
            let outcome = if i < 4 { Outcome::Success } else { Outcome::Failed };
            storage
                .insert_execution(&record("p-ok", Tier::Autonomous, outcome, 0.8))
                .await
                .unwrap();
        }
        let report = calibrator.compute_drift().await.unwrap();
        let entry = report
            .entries
            .iter()
            .find(|e| e.pattern_id == "p-ok")
            .unwrap();
        assert!(!entry.flagged);
        assert_eq!(report.flagged().count(), 0);
    }

    #[tokio::test]
    async fn under_sampled_pattern_is_never_flagged() {
        let (_dir, storage, calibrator) = setup().await;
        storage
            .insert_execution(&record("p-young", Tier::Autonomous, Outcome::Failed, 0.95))
            .await
            .unwrap();
        let report = calibrator.compute_drift().await.unwrap();
        let entry = report
            .entries
            .iter()
            .find(|e| e.pattern_id == "p-young")
            .unwrap();
        assert!(!entry.flagged);
    }

    #[tokio::test]
    async fn high_failure_rate_raises_threshold() {
        let (_dir, storage, calibrator) = setup().await;
        for i in 0..10 {
            let outcome = if i < 7 { Outcome::Success } else { Outcome::Failed };
            storage
                .insert_execution(&record("p1", Tier::Autonomous, outcome, 0.9))
                .await
                .unwrap();
        }
        let thresholds = ThresholdStore::load(storage, &ThresholdDefaults::default())
            .await
            .unwrap();
        let before = thresholds.current().await.auto_execute_threshold;

        let proposed = calibrator
            .propose_threshold_adjustment(&thresholds, true)
            .await
            .unwrap();
        assert!(proposed.auto_execute_threshold > before);
        // Dry run: live config untouched.
        assert_eq!(thresholds.current().await.version, 1);

        let committed = calibrator
            .propose_threshold_adjustment(&thresholds, false)
            .await
            .unwrap();
        assert_eq!(committed.version, 2);
        assert_eq!(thresholds.current().await.version, 2);
    }

    #[tokio::test]
    async fn low_failure_rate_relaxes_threshold_within_floor() {
        let (_dir, storage, calibrator) = setup().await;
        for _ in 0..10 {
            storage
                .insert_execution(&record("p1", Tier::Autonomous, Outcome::Success, 0.9))
                .await
                .unwrap();
        }
        let thresholds = ThresholdStore::load(storage, &ThresholdDefaults::default())
            .await
            .unwrap();
        let before = thresholds.current().await.auto_execute_threshold;

        let proposed = calibrator
            .propose_threshold_adjustment(&thresholds, true)
            .await
            .unwrap();
        assert!(proposed.auto_execute_threshold < before);
        assert!(proposed.auto_execute_threshold >= proposed.assisted_mode_min);
    }
}
