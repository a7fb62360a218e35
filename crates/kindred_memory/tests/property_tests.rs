//! Property-based tests for the importance and ranking formulas.
//!
//! Whatever a caller or a provider feeds in, importance stays in [0, 1],
//! recency stays in (0, 1], and the composite score is monotone in each
//! of its terms.

use kindred_core::{MemoryConfig, MemoryKind, RecallWeights};
use kindred_memory::scoring::{composite_score, initial_importance, recency_decay};
use proptest::prelude::*;

fn arb_kind() -> impl Strategy<Value = MemoryKind> {
    prop::sample::select(MemoryKind::ALL.to_vec())
}

fn arb_any_f32() -> impl Strategy<Value = f32> {
    prop_oneof![
        -2.0f32..=2.0,
        Just(f32::NAN),
        Just(f32::INFINITY),
        Just(f32::NEG_INFINITY),
    ]
}

proptest! {
    #[test]
    fn importance_stays_in_unit_range(
        sentiment in arb_any_f32(),
        novelty in arb_any_f32(),
        kind in arb_kind(),
    ) {
        let importance = initial_importance(sentiment, novelty, kind, &MemoryConfig::default());
        prop_assert!((0.0..=1.0).contains(&importance), "{importance}");
    }

    #[test]
    fn importance_grows_with_charge_and_novelty(
        s in 0.0f32..=1.0,
        n in 0.0f32..=1.0,
        extra in 0.0f32..=1.0,
        kind in arb_kind(),
    ) {
        let config = MemoryConfig::default();
        let base = initial_importance(s, n, kind, &config);
        prop_assert!(initial_importance((s + extra).min(1.0), n, kind, &config) >= base);
        prop_assert!(initial_importance(-s, n, kind, &config) == base);
        prop_assert!(initial_importance(s, (n + extra).min(1.0), kind, &config) >= base);
    }

    #[test]
    fn recency_stays_in_unit_range(minutes in -10_000i64..10_000_000, half_life in 1.0f64..10_000.0) {
        let recency = recency_decay(chrono::Duration::minutes(minutes), half_life);
        prop_assert!(recency > 0.0 || minutes > 0);
        prop_assert!((0.0..=1.0).contains(&recency), "{recency}");
    }

    #[test]
    fn composite_score_is_monotone_in_similarity(
        low in 0.0f32..=1.0,
        bump in 0.0f32..=1.0,
        importance in 0.0f32..=1.0,
        recency in 0.0f32..=1.0,
    ) {
        let w = RecallWeights::default();
        let high = (low + bump).min(1.0);
        prop_assert!(
            composite_score(high, importance, recency, &w)
                >= composite_score(low, importance, recency, &w)
        );
    }
}
