//! Importance and ranking formulas.

use kindred_core::{MemoryConfig, MemoryKind, RecallWeights};

/// Importance assigned at creation:
/// `w_s·|sentiment| + w_n·novelty + kind_weight`, clamped to [0, 1].
///
/// `novelty` is 1 minus the similarity to the closest live entry.
pub fn initial_importance(
    sentiment: f32,
    novelty: f32,
    kind: MemoryKind,
    config: &MemoryConfig,
) -> f32 {
    let w = &config.importance_weights;
    let raw = w.sentiment * sentiment.abs()
        + w.novelty * novelty.clamp(0.0, 1.0)
        + config.kind_weight.get(kind);
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Exponential recency term in (0, 1]: 1 for "just now", 0.5 after one
/// half-life.
pub fn recency_decay(age: chrono::Duration, half_life_hours: f64) -> f32 {
    let hours = (age.num_milliseconds().max(0) as f64) / 3_600_000.0;
    (-std::f64::consts::LN_2 * hours / half_life_hours).exp() as f32
}

pub fn composite_score(similarity: f32, importance: f32, recency: f32, w: &RecallWeights) -> f32 {
    w.similarity * similarity + w.importance * importance + w.recency * recency
}
