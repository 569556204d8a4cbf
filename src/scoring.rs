// SPDX-License-Identifier: MIT
//! Confidence scorer.
//!
//! Aggregates five weighted factors into one bounded score per candidate:
//!
//! | Factor              | Meaning                                             |
//! |---------------------|-----------------------------------------------------|
//! | `patternMatch`      | Specificity of the registry hit (0 = no match)      |
//! | `historicalSuccess` | Pattern's rolling success rate, damped when young   |
//! | `complexityPenalty` | 1 − estimated complexity of the selected approach   |
//! | `reversibility`     | How cheaply the approach can be undone              |
//! | `contextClarity`    | Detector-supplied; opaque to this core              |
//!
//! `aggregate = Σ weight[f] × factor[f]`, clamped to [0, 1]. Scoring is a
//! pure synchronous computation — it never blocks and never aborts: a missing
//! factor scores 0 and leaves a warning annotation on the candidate.

use crate::config::ScoringConfig;
use crate::outcomes::PatternPerformance;
use crate::thresholds::ThresholdConfig;
use crate::tiers::Tier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

// ─── Factors ──────────────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Factor {
    PatternMatch,
    HistoricalSuccess,
    ComplexityPenalty,
    Reversibility,
    ContextClarity,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::PatternMatch,
        Factor::HistoricalSuccess,
        Factor::ComplexityPenalty,
        Factor::Reversibility,
        Factor::ContextClarity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::PatternMatch => "patternMatch",
            Factor::HistoricalSuccess => "historicalSuccess",
            Factor::ComplexityPenalty => "complexityPenalty",
            Factor::Reversibility => "reversibility",
            Factor::ContextClarity => "contextClarity",
        }
    }
}

// ─── Candidate & approach ─────────────────────────────────────────────────────

/// A way of resolving a candidate, as proposed by the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approach {
    pub id: String,
    pub candidate_id: String,
    pub description: String,
    /// 1 = trivially reversible.
    pub reversibility: f64,
    /// 1 = most complex.
    pub estimated_complexity: f64,
}

/// A proposed automated action awaiting a confidence score and tier decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    /// Opaque locator into the originating detector's domain. Doubles as the
    /// target resource key for per-resource execution serialization.
    pub source_ref: String,
    /// `None` means first-time pattern — no registry match.
    pub matched_pattern_id: Option<String>,
    pub raw_factors: BTreeMap<Factor, f64>,
    /// Immutable once assigned by `score`.
    pub aggregate_confidence: Option<f64>,
    pub tier: Option<Tier>,
    pub approaches: Vec<Approach>,
    pub selected_approach_id: Option<String>,
    /// Threshold config version the score was computed under.
    pub threshold_version: Option<i64>,
    /// Non-fatal scoring annotations (missing factors, damping applied).
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: String,
}

impl Candidate {
    pub fn approach(&self, approach_id: &str) -> Option<&Approach> {
        self.approaches.iter().find(|a| a.id == approach_id)
    }

    pub fn selected_approach(&self) -> Option<&Approach> {
        self.selected_approach_id
            .as_deref()
            .and_then(|id| self.approach(id))
    }
}

// ─── Scorer ───────────────────────────────────────────────────────────────────

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// `historicalSuccess` for a pattern, with first-time-pattern damping: below
/// `min_samples` recorded outcomes the unstable small-sample rate is replaced
/// by a conservative constant, so one lucky or unlucky early outcome cannot
/// produce an overconfident or overly timid score.
pub fn historical_success_factor(
    performance: Option<&PatternPerformance>,
    config: &ScoringConfig,
) -> (f64, bool) {
    match performance {
        Some(perf) if perf.usage_count >= config.min_samples => {
            let denominator = perf.success_count + perf.failure_count;
            if denominator == 0 {
                (config.damped_historical_success, true)
            } else {
                (clamp01(perf.success_count as f64 / denominator as f64), false)
            }
        }
        _ => (config.damped_historical_success, true),
    }
}

/// Weighted aggregate over an explicit factor map. Missing factors contribute
/// 0 (fail closed) and are reported back for annotation.
pub fn aggregate(
    factors: &BTreeMap<Factor, f64>,
    thresholds: &ThresholdConfig,
) -> (f64, Vec<Factor>) {
    let mut sum = 0.0;
    let mut missing = Vec::new();
    for factor in Factor::ALL {
        match factors.get(&factor) {
            Some(value) => sum += thresholds.weights.get(factor) * clamp01(*value),
            None => missing.push(factor),
        }
    }
    (clamp01(sum), missing)
}

/// Score a candidate against the active threshold config, selecting the best
/// approach and freezing `aggregate_confidence`.
///
/// Per-approach factors (`complexityPenalty`, `reversibility`) come from the
/// approach itself; candidate-level factors (`patternMatch`,
/// `contextClarity`) from the detector; `historicalSuccess` from pattern
/// performance with damping. Tie-break across equal-scoring approaches:
/// higher reversibility, then lower estimated complexity.
pub fn score_candidate(
    candidate: &mut Candidate,
    thresholds: &ThresholdConfig,
    performance: Option<&PatternPerformance>,
    config: &ScoringConfig,
) {
    if candidate.aggregate_confidence.is_some() {
        return;
    }

    let (historical, damped) = historical_success_factor(performance, config);
    candidate
        .raw_factors
        .insert(Factor::HistoricalSuccess, historical);
    if damped {
        candidate.warnings.push(format!(
            "historicalSuccess damped to {} (insufficient samples)",
            config.damped_historical_success
        ));
    }

    let scored: Option<(f64, Approach, BTreeMap<Factor, f64>)> = candidate
        .approaches
        .iter()
        .map(|approach| {
            let mut factors = candidate.raw_factors.clone();
            factors.insert(
                Factor::ComplexityPenalty,
                clamp01(1.0 - approach.estimated_complexity),
            );
            factors.insert(Factor::Reversibility, clamp01(approach.reversibility));
            let (score, _) = aggregate(&factors, thresholds);
            (score, approach.clone(), factors)
        })
        .max_by(|(sa, a, _), (sb, b, _)| {
            sa.partial_cmp(sb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.reversibility
                        .partial_cmp(&b.reversibility)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(
                    b.estimated_complexity
                        .partial_cmp(&a.estimated_complexity)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

    let (confidence, missing) = match scored {
        Some((score, approach, factors)) => {
            candidate.selected_approach_id = Some(approach.id.clone());
            candidate.raw_factors = factors.clone();
            let (_, missing) = aggregate(&factors, thresholds);
            (score, missing)
        }
        None => {
            // No approaches at all: score from candidate-level factors only.
            aggregate(&candidate.raw_factors, thresholds)
        }
    };

    for factor in missing {
        candidate.warnings.push(format!(
            "missing factor {}: treated as 0",
            factor.as_str()
        ));
    }

    candidate.aggregate_confidence = Some(confidence);
    candidate.threshold_version = Some(thresholds.version);
    debug!(
        candidate_id = %candidate.id,
        confidence,
        threshold_version = thresholds.version,
        "candidate scored"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::FactorWeights;
    use chrono::Utc;

    fn thresholds() -> ThresholdConfig {
        ThresholdConfig {
            version: 1,
            auto_execute_threshold: 0.85,
            assisted_mode_min: 0.6,
            report_only_max: 0.3,
            max_autonomous_per_day: 10,
            weights: FactorWeights::uniform(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    fn candidate(approaches: Vec<(f64, f64)>) -> Candidate {
        let id = "cand-1".to_string();
        Candidate {
            id: id.clone(),
            source_ref: "docs/page.md".to_string(),
            matched_pattern_id: Some("p1".to_string()),
            raw_factors: [
                (Factor::PatternMatch, 0.9),
                (Factor::ContextClarity, 0.9),
            ]
            .into(),
            aggregate_confidence: None,
            tier: None,
            approaches: approaches
                .into_iter()
                .enumerate()
                .map(|(i, (reversibility, complexity))| Approach {
                    id: format!("a{i}"),
                    candidate_id: id.clone(),
                    description: format!("approach {i}"),
                    reversibility,
                    estimated_complexity: complexity,
                })
                .collect(),
            selected_approach_id: None,
            threshold_version: None,
            warnings: Vec::new(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn performance(usage: u64, successes: u64) -> PatternPerformance {
        PatternPerformance {
            pattern_id: "p1".to_string(),
            usage_count: usage,
            success_count: successes,
            failure_count: usage - successes,
            average_confidence_at_execution: 0.8,
            last_updated: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn worked_scenario_equal_weights() {
        // factors {0.9, 0.5, 0.8, 0.9, 0.9} at weight 0.2 each → 0.80.
        let mut cand = candidate(vec![(0.9, 0.2)]);
        score_candidate(&mut cand, &thresholds(), None, &ScoringConfig::default());
        let confidence = cand.aggregate_confidence.unwrap();
        assert!((confidence - 0.80).abs() < 1e-9, "got {confidence}");
    }

    #[test]
    fn damping_applies_below_min_samples() {
        let config = ScoringConfig::default();
        let (young, damped) = historical_success_factor(Some(&performance(2, 2)), &config);
        assert!(damped);
        assert!((young - 0.5).abs() < 1e-9);

        let (seasoned, damped) = historical_success_factor(Some(&performance(10, 10)), &config);
        assert!(!damped);
        assert!((seasoned - 1.0).abs() < 1e-9);
    }

    #[test]
    fn damped_score_strictly_below_seasoned_success() {
        let config = ScoringConfig::default();
        let mut young = candidate(vec![(0.9, 0.2)]);
        score_candidate(&mut young, &thresholds(), None, &config);

        let mut seasoned = candidate(vec![(0.9, 0.2)]);
        score_candidate(
            &mut seasoned,
            &thresholds(),
            Some(&performance(10, 10)),
            &config,
        );

        assert!(
            young.aggregate_confidence.unwrap() < seasoned.aggregate_confidence.unwrap()
        );
        assert!(young.warnings.iter().any(|w| w.contains("damped")));
    }

    #[test]
    fn missing_factor_scores_zero_with_warning() {
        let mut cand = candidate(vec![(0.9, 0.2)]);
        cand.raw_factors.remove(&Factor::ContextClarity);
        score_candidate(&mut cand, &thresholds(), None, &ScoringConfig::default());
        // 0.2×0.9 + 0.2×0.5 + 0.2×0.8 + 0.2×0.9 + 0 = 0.62
        let confidence = cand.aggregate_confidence.unwrap();
        assert!((confidence - 0.62).abs() < 1e-9, "got {confidence}");
        assert!(cand
            .warnings
            .iter()
            .any(|w| w.contains("contextClarity")));
    }

    #[test]
    fn tie_break_prefers_reversibility_then_lower_complexity() {
        // Both approaches score identically (reversibility+penalty sums equal)
        // but a1 is more reversible.
        let mut cand = candidate(vec![(0.6, 0.2), (0.8, 0.4)]);
        score_candidate(&mut cand, &thresholds(), None, &ScoringConfig::default());
        assert_eq!(cand.selected_approach_id.as_deref(), Some("a1"));

        // With complexity carrying no weight the scores tie exactly at equal
        // reversibility: lower complexity wins.
        let mut unweighted = thresholds();
        unweighted.weights = FactorWeights {
            pattern_match: 0.25,
            historical_success: 0.25,
            complexity_penalty: 0.0,
            reversibility: 0.25,
            context_clarity: 0.25,
        };
        let mut cand = candidate(vec![(0.8, 0.7), (0.8, 0.3)]);
        score_candidate(&mut cand, &unweighted, None, &ScoringConfig::default());
        assert_eq!(cand.selected_approach_id.as_deref(), Some("a1"));
    }

    #[test]
    fn score_is_immutable_once_assigned() {
        let mut cand = candidate(vec![(0.9, 0.2)]);
        score_candidate(&mut cand, &thresholds(), None, &ScoringConfig::default());
        let first = cand.aggregate_confidence.unwrap();

        let mut richer = thresholds();
        richer.version = 2;
        score_candidate(
            &mut cand,
            &richer,
            Some(&performance(10, 10)),
            &ScoringConfig::default(),
        );
        assert_eq!(cand.aggregate_confidence.unwrap(), first);
        assert_eq!(cand.threshold_version, Some(1));
    }

    #[test]
    fn candidate_without_approaches_still_scores() {
        let mut cand = candidate(vec![]);
        score_candidate(&mut cand, &thresholds(), None, &ScoringConfig::default());
        assert!(cand.aggregate_confidence.is_some());
        assert!(cand.selected_approach_id.is_none());
        assert!(cand
            .warnings
            .iter()
            .any(|w| w.contains("complexityPenalty")));
    }
}
