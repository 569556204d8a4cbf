// SPDX-License-Identifier: MIT
//! Versioned threshold configuration.
//!
//! There is no global mutable threshold state: `score`/`classify`/`execute`
//! take an explicit `ThresholdConfig` snapshot, and every `ExecutionRecord`
//! freezes the version active at its own decision time so past decisions can
//! be replayed deterministically. The store is read-heavy and copy-on-write —
//! readers hold an `Arc` snapshot and never observe a partially-written
//! config.

use crate::config::ThresholdDefaults;
use crate::error::{EngineError, Result};
use crate::scoring::Factor;
use crate::storage::Storage;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

const WEIGHT_SUM_EPSILON: f64 = 1e-6;

// ─── FactorWeights ────────────────────────────────────────────────────────────

/// Per-factor aggregation weights. Non-negative, summing to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorWeights {
    pub pattern_match: f64,
    pub historical_success: f64,
    pub complexity_penalty: f64,
    pub reversibility: f64,
    pub context_clarity: f64,
}

impl FactorWeights {
    /// 0.2 across the board.
    pub fn uniform() -> Self {
        Self {
            pattern_match: 0.2,
            historical_success: 0.2,
            complexity_penalty: 0.2,
            reversibility: 0.2,
            context_clarity: 0.2,
        }
    }

    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::PatternMatch => self.pattern_match,
            Factor::HistoricalSuccess => self.historical_success,
            Factor::ComplexityPenalty => self.complexity_penalty,
            Factor::Reversibility => self.reversibility,
            Factor::ContextClarity => self.context_clarity,
        }
    }

    fn sum(&self) -> f64 {
        self.pattern_match
            + self.historical_success
            + self.complexity_penalty
            + self.reversibility
            + self.context_clarity
    }

    pub fn validate(&self) -> Result<()> {
        let all = [
            self.pattern_match,
            self.historical_success,
            self.complexity_penalty,
            self.reversibility,
            self.context_clarity,
        ];
        if all.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(EngineError::InvalidWeights(
                "weights must be finite and non-negative".to_string(),
            ));
        }
        if (self.sum() - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(EngineError::InvalidWeights(format!(
                "weights must sum to 1, got {}",
                self.sum()
            )));
        }
        Ok(())
    }
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self::uniform()
    }
}

// ─── ThresholdConfig ──────────────────────────────────────────────────────────

/// One immutable version of the tier band configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    pub version: i64,
    pub auto_execute_threshold: f64,
    pub assisted_mode_min: f64,
    pub report_only_max: f64,
    pub max_autonomous_per_day: u32,
    pub weights: FactorWeights,
    pub updated_at: String,
}

/// Unversioned band values submitted to `adjust_thresholds`; the store
/// assigns the version and timestamp on commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdDraft {
    pub auto_execute_threshold: f64,
    pub assisted_mode_min: f64,
    pub report_only_max: f64,
    pub max_autonomous_per_day: u32,
    #[serde(default)]
    pub weights: FactorWeights,
}

impl ThresholdDraft {
    /// Bands must be monotonic and within [0, 1]; weights must be a valid
    /// convex combination. Rejects with `InvalidThresholdOrdering` /
    /// `InvalidWeights` at write time so no reader ever sees a bad config.
    pub fn validate(&self) -> Result<()> {
        let ordered = 0.0 <= self.report_only_max
            && self.report_only_max < self.assisted_mode_min
            && self.assisted_mode_min <= self.auto_execute_threshold
            && self.auto_execute_threshold <= 1.0;
        if !ordered {
            return Err(EngineError::InvalidThresholdOrdering {
                report_only_max: self.report_only_max,
                assisted_mode_min: self.assisted_mode_min,
                auto_execute_threshold: self.auto_execute_threshold,
            });
        }
        self.weights.validate()
    }

    fn into_config(self, version: i64) -> ThresholdConfig {
        ThresholdConfig {
            version,
            auto_execute_threshold: self.auto_execute_threshold,
            assisted_mode_min: self.assisted_mode_min,
            report_only_max: self.report_only_max,
            max_autonomous_per_day: self.max_autonomous_per_day,
            weights: self.weights,
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

impl From<&ThresholdConfig> for ThresholdDraft {
    fn from(config: &ThresholdConfig) -> Self {
        Self {
            auto_execute_threshold: config.auto_execute_threshold,
            assisted_mode_min: config.assisted_mode_min,
            report_only_max: config.report_only_max,
            max_autonomous_per_day: config.max_autonomous_per_day,
            weights: config.weights,
        }
    }
}

// ─── ThresholdStore ───────────────────────────────────────────────────────────

pub struct ThresholdStore {
    storage: Storage,
    active: RwLock<Arc<ThresholdConfig>>,
}

impl ThresholdStore {
    /// Load the latest persisted version, seeding version 1 from config-file
    /// defaults when the store is empty.
    pub async fn load(storage: Storage, defaults: &ThresholdDefaults) -> Result<Self> {
        let active = match storage.latest_threshold_config().await? {
            Some(row) => row.into_config()?,
            None => {
                let draft = ThresholdDraft {
                    auto_execute_threshold: defaults.auto_execute_threshold,
                    assisted_mode_min: defaults.assisted_mode_min,
                    report_only_max: defaults.report_only_max,
                    max_autonomous_per_day: defaults.max_autonomous_per_day,
                    weights: FactorWeights::uniform(),
                };
                draft.validate()?;
                let seeded = draft.into_config(1);
                storage.insert_threshold_config(&seeded).await?;
                info!(version = 1, "seeded initial threshold config");
                seeded
            }
        };
        Ok(Self {
            storage,
            active: RwLock::new(Arc::new(active)),
        })
    }

    /// Cheap snapshot of the active config.
    pub async fn current(&self) -> Arc<ThresholdConfig> {
        self.active.read().await.clone()
    }

    /// Validate a draft and show the config it would become, without
    /// persisting anything.
    pub async fn preview(&self, draft: ThresholdDraft) -> Result<ThresholdConfig> {
        draft.validate()?;
        let next_version = self.active.read().await.version + 1;
        Ok(draft.into_config(next_version))
    }

    /// Validate, persist as a new version, and swap the active snapshot.
    pub async fn commit(&self, draft: ThresholdDraft) -> Result<Arc<ThresholdConfig>> {
        draft.validate()?;
        let mut guard = self.active.write().await;
        let config = Arc::new(draft.into_config(guard.version + 1));
        self.storage.insert_threshold_config(&config).await?;
        info!(
            version = config.version,
            auto_execute_threshold = config.auto_execute_threshold,
            "threshold config committed"
        );
        *guard = config.clone();
        Ok(config)
    }
}
