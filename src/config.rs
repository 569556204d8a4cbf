// SPDX-License-Identifier: MIT
//! Engine configuration (`opsgate.toml`).
//!
//! Every section has full defaults so an empty file (or no file) yields a
//! working engine. Threshold band values here only seed version 1 of the
//! threshold store on first startup — after that the versioned store is
//! authoritative and config-file edits do not retroactively apply.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ─── ScoringConfig ────────────────────────────────────────────────────────────

/// Confidence scorer tuning (`[scoring]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum recorded outcomes before a pattern's rolling success rate is
    /// trusted. Below this, `historicalSuccess` is damped to
    /// `damped_historical_success` (first-time-pattern damping).
    pub min_samples: u64,
    /// Conservative stand-in for `historicalSuccess` while under-sampled.
    pub damped_historical_success: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            damped_historical_success: 0.5,
        }
    }
}

// ─── ExecutionConfig ──────────────────────────────────────────────────────────

/// Safe-execution workflow tuning (`[execution]`).
///
/// Timeouts on the execute/validate steps are treated as validation failure
/// (triggering rollback), not as a distinct outcome.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Seconds allowed for the mutation step.
    pub execute_timeout_secs: u64,
    /// Seconds allowed for post-execution validation.
    pub validate_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            execute_timeout_secs: 60,
            validate_timeout_secs: 60,
        }
    }
}

// ─── CalibrationConfig ────────────────────────────────────────────────────────

/// Calibrator tuning (`[calibration]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Per-pattern |predicted − actual| divergence at which drift is flagged.
    pub drift_threshold: f64,
    /// Minimum effective outcomes before a pattern participates in drift
    /// analysis or threshold proposals.
    pub min_samples: u64,
    /// Autonomous-tier failure rate above which a threshold raise is proposed.
    pub failure_rate_ceiling: f64,
    /// Step size applied to `auto_execute_threshold` per proposal.
    pub adjustment_step: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 0.25,
            min_samples: 5,
            failure_rate_ceiling: 0.10,
            adjustment_step: 0.02,
        }
    }
}

// ─── ThresholdDefaults ────────────────────────────────────────────────────────

/// Seed values for threshold store version 1 (`[thresholds]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThresholdDefaults {
    pub auto_execute_threshold: f64,
    pub assisted_mode_min: f64,
    pub report_only_max: f64,
    pub max_autonomous_per_day: u32,
}

impl Default for ThresholdDefaults {
    fn default() -> Self {
        Self {
            auto_execute_threshold: 0.85,
            assisted_mode_min: 0.60,
            report_only_max: 0.30,
            max_autonomous_per_day: 10,
        }
    }
}

// ─── EngineConfig ─────────────────────────────────────────────────────────────

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the SQLite database and snapshot files.
    pub data_dir: PathBuf,
    pub scoring: ScoringConfig,
    pub execution: ExecutionConfig,
    pub calibration: CalibrationConfig,
    pub thresholds: ThresholdDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".opsgate"),
            scoring: ScoringConfig::default(),
            execution: ExecutionConfig::default(),
            calibration: CalibrationConfig::default(),
            thresholds: ThresholdDefaults::default(),
        }
    }
}

impl EngineConfig {
    /// Config with defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file. A missing file yields the defaults; a present
    /// but malformed file is an error (silent fallback would mask typos).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: EngineConfig = toml::from_str("").expect("parse");
        assert_eq!(config.scoring.min_samples, 3);
        assert!((config.scoring.damped_historical_success - 0.5).abs() < 1e-9);
        assert_eq!(config.thresholds.max_autonomous_per_day, 10);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: EngineConfig = toml::from_str(
            "[scoring]\nmin_samples = 7\n\n[execution]\nexecute_timeout_secs = 5\n",
        )
        .expect("parse");
        assert_eq!(config.scoring.min_samples, 7);
        assert!((config.scoring.damped_historical_success - 0.5).abs() < 1e-9);
        assert_eq!(config.execution.execute_timeout_secs, 5);
        assert_eq!(config.execution.validate_timeout_secs, 60);
    }
}
