//! Property tests for the scoring and classification invariants.

use opsgate::{classify, scoring, Factor, FactorWeights, ThresholdConfig, Tier};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn thresholds(report_only_max: f64, assisted_mode_min: f64, auto: f64) -> ThresholdConfig {
    ThresholdConfig {
        version: 1,
        auto_execute_threshold: auto,
        assisted_mode_min,
        report_only_max,
        max_autonomous_per_day: 10,
        weights: FactorWeights::uniform(),
        updated_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

fn factor_map(values: [f64; 5]) -> BTreeMap<Factor, f64> {
    Factor::ALL.into_iter().zip(values).collect()
}

proptest! {
    #[test]
    fn aggregate_confidence_is_always_bounded(
        values in prop::array::uniform5(-2.0f64..3.0),
    ) {
        let (confidence, _) = scoring::aggregate(
            &factor_map(values),
            &thresholds(0.3, 0.6, 0.85),
        );
        prop_assert!((0.0..=1.0).contains(&confidence));
    }

    #[test]
    fn aggregate_is_monotonic_in_historical_success(
        base in prop::array::uniform5(0.0f64..=1.0),
        lower in 0.0f64..=1.0,
        raise in 0.0f64..=1.0,
    ) {
        let higher = (lower + raise).min(1.0);
        let t = thresholds(0.3, 0.6, 0.85);

        let mut low = factor_map(base);
        low.insert(Factor::HistoricalSuccess, lower);
        let mut high = factor_map(base);
        high.insert(Factor::HistoricalSuccess, higher);

        let (low_score, _) = scoring::aggregate(&low, &t);
        let (high_score, _) = scoring::aggregate(&high, &t);
        prop_assert!(high_score >= low_score);
    }

    #[test]
    fn classify_is_total_over_the_unit_interval(
        confidence in 0.0f64..=1.0,
        bands in prop::array::uniform3(0.0f64..1.0),
        daily_count in 0u32..20,
    ) {
        // Sort into a valid band ordering; classify itself must accept any
        // confidence without panicking.
        let mut bands = bands;
        bands.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let t = thresholds(bands[0], bands[1].max(bands[0] + 1e-9), bands[2].max(bands[1] + 1e-9));

        let tier = classify(confidence, &t, daily_count);
        prop_assert!(matches!(
            tier,
            Tier::Autonomous | Tier::Assisted | Tier::ReportOnly | Tier::Blocked
        ));
        // Idempotent: same inputs, same tier.
        prop_assert_eq!(tier, classify(confidence, &t, daily_count));
    }

    #[test]
    fn missing_factors_never_raise_the_score(
        values in prop::array::uniform5(0.0f64..=1.0),
    ) {
        let t = thresholds(0.3, 0.6, 0.85);
        let full = factor_map(values);
        let (full_score, missing) = scoring::aggregate(&full, &t);
        prop_assert!(missing.is_empty());

        let mut partial = full.clone();
        partial.remove(&Factor::ContextClarity);
        let (partial_score, missing) = scoring::aggregate(&partial, &t);
        prop_assert_eq!(missing, vec![Factor::ContextClarity]);
        prop_assert!(partial_score <= full_score);
    }
}
