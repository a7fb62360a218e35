//! Personality state: Big Five traits (slow) and PAD mood (fast).
//!
//! Both transitions are total functions over the clamped value space:
//! [`PersonalityState::apply_signal`] for a conversational turn and
//! [`PersonalityState::decay_toward_baseline`] for idle time. Neither can
//! fail and neither can leave [0, 1].

use crate::config::PersonalityConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

#[inline]
fn unit(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// The five trait names, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitName {
    Openness,
    Conscientiousness,
    Extraversion,
    Agreeableness,
    Neuroticism,
}

impl TraitName {
    pub const ALL: [TraitName; 5] = [
        Self::Openness,
        Self::Conscientiousness,
        Self::Extraversion,
        Self::Agreeableness,
        Self::Neuroticism,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openness => "openness",
            Self::Conscientiousness => "conscientiousness",
            Self::Extraversion => "extraversion",
            Self::Agreeableness => "agreeableness",
            Self::Neuroticism => "neuroticism",
        }
    }

    /// (high pole, low pole) adjectives.
    fn poles(&self) -> (&'static str, &'static str) {
        match self {
            Self::Openness => ("curious", "conventional"),
            Self::Conscientiousness => ("organized", "spontaneous"),
            Self::Extraversion => ("outgoing", "reserved"),
            Self::Agreeableness => ("friendly", "challenging"),
            Self::Neuroticism => ("sensitive", "resilient"),
        }
    }

    /// Adjective for a trait value, or `None` right at the midpoint.
    pub fn describe(&self, value: f32) -> Option<String> {
        let (high, low) = self.poles();
        if value > 0.7 {
            Some(format!("very {}", high))
        } else if value > 0.5 {
            Some(format!("somewhat {}", high))
        } else if value < 0.3 {
            Some(format!("very {}", low))
        } else if value < 0.5 {
            Some(format!("somewhat {}", low))
        } else {
            None
        }
    }
}

/// Big Five traits, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Traits {
    pub openness: f32,
    pub conscientiousness: f32,
    pub extraversion: f32,
    pub agreeableness: f32,
    pub neuroticism: f32,
}

impl Default for Traits {
    fn default() -> Self {
        Self {
            openness: 0.7,
            conscientiousness: 0.8,
            extraversion: 0.6,
            agreeableness: 0.75,
            neuroticism: 0.4,
        }
    }
}

impl Traits {
    pub fn get(&self, name: TraitName) -> f32 {
        match name {
            TraitName::Openness => self.openness,
            TraitName::Conscientiousness => self.conscientiousness,
            TraitName::Extraversion => self.extraversion,
            TraitName::Agreeableness => self.agreeableness,
            TraitName::Neuroticism => self.neuroticism,
        }
    }

    fn get_mut(&mut self, name: TraitName) -> &mut f32 {
        match name {
            TraitName::Openness => &mut self.openness,
            TraitName::Conscientiousness => &mut self.conscientiousness,
            TraitName::Extraversion => &mut self.extraversion,
            TraitName::Agreeableness => &mut self.agreeableness,
            TraitName::Neuroticism => &mut self.neuroticism,
        }
    }

    pub fn in_bounds(&self) -> bool {
        TraitName::ALL
            .iter()
            .all(|t| (0.0..=1.0).contains(&self.get(*t)))
    }

    /// Resting mood this personality drifts back to when left alone.
    pub fn baseline_mood(&self) -> Mood {
        Mood {
            valence: unit(
                0.5 + 0.25 * (self.extraversion - self.neuroticism)
                    + 0.25 * (self.agreeableness - 0.5),
            ),
            arousal: unit(0.2 + 0.4 * self.extraversion + 0.2 * self.neuroticism),
            dominance: unit(
                0.2 + 0.3 * self.conscientiousness
                    + 0.3 * (1.0 - self.neuroticism)
                    + 0.2 * self.extraversion,
            ),
        }
    }

    /// How strongly a turn signal pushes each trait, before scaling.
    fn signal_component(name: TraitName, signal: &TurnSignal) -> f32 {
        let engagement = signal.engagement * 2.0 - 1.0;
        match name {
            TraitName::Openness => engagement,
            TraitName::Conscientiousness => 0.5 * engagement,
            TraitName::Extraversion => 0.5 * signal.sentiment + 0.5 * engagement,
            TraitName::Agreeableness => signal.sentiment,
            TraitName::Neuroticism => -signal.sentiment,
        }
    }
}

/// PAD mood, each axis in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mood {
    pub valence: f32,
    pub arousal: f32,
    pub dominance: f32,
}

impl Default for Mood {
    fn default() -> Self {
        Self {
            valence: 0.7,
            arousal: 0.5,
            dominance: 0.6,
        }
    }
}

impl Mood {
    pub fn new(valence: f32, arousal: f32, dominance: f32) -> Self {
        Self {
            valence: unit(valence),
            arousal: unit(arousal),
            dominance: unit(dominance),
        }
    }

    /// Interpolate towards `other`; `t` is clamped to [0, 1] so the result
    /// never passes the target.
    pub fn lerp(&self, other: &Mood, t: f32) -> Mood {
        let t = t.clamp(0.0, 1.0);
        Mood::new(
            self.valence + (other.valence - self.valence) * t,
            self.arousal + (other.arousal - self.arousal) * t,
            self.dominance + (other.dominance - self.dominance) * t,
        )
    }

    /// Euclidean distance in PAD space.
    pub fn distance(&self, other: &Mood) -> f32 {
        ((self.valence - other.valence).powi(2)
            + (self.arousal - other.arousal).powi(2)
            + (self.dominance - other.dominance).powi(2))
        .sqrt()
    }

    /// Mood implied by a single turn, with no history.
    fn from_signal(signal: &TurnSignal) -> Mood {
        let engagement = signal.engagement * 2.0 - 1.0;
        Mood::new(
            (signal.sentiment + 1.0) / 2.0,
            0.5 * signal.engagement + 0.5 * signal.sentiment.abs(),
            0.5 + 0.3 * signal.sentiment + 0.2 * engagement,
        )
    }

    pub fn in_bounds(&self) -> bool {
        [self.valence, self.arousal, self.dominance]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }

    pub fn label(&self) -> &'static str {
        match (self.valence, self.arousal) {
            (v, a) if v > 0.7 && a > 0.7 => "enthusiastic and excited",
            (v, a) if v > 0.7 && a > 0.3 => "happy and content",
            (v, _) if v > 0.7 => "calm and peaceful",
            (v, a) if v > 0.3 && a > 0.7 => "alert and energetic",
            (v, a) if v > 0.3 && a > 0.3 => "neutral but attentive",
            (v, _) if v > 0.3 => "relaxed and tranquil",
            (_, a) if a > 0.7 => "tense and nervous",
            (_, a) if a > 0.3 => "sad or disappointed",
            _ => "tired and lethargic",
        }
    }
}

/// Sentiment and topic engagement extracted from the latest turn by the
/// conversation engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnSignal {
    /// [-1, 1]
    pub sentiment: f32,
    /// [0, 1]
    pub engagement: f32,
}

impl TurnSignal {
    pub fn new(sentiment: f32, engagement: f32) -> Self {
        Self {
            sentiment,
            engagement,
        }
        .sanitized()
    }

    /// Clamp into range; non-finite components become neutral.
    pub fn sanitized(&self) -> Self {
        Self {
            sentiment: if self.sentiment.is_finite() {
                self.sentiment.clamp(-1.0, 1.0)
            } else {
                0.0
            },
            engagement: if self.engagement.is_finite() {
                self.engagement.clamp(0.0, 1.0)
            } else {
                0.5
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoodSnapshot {
    pub at: DateTime<Utc>,
    pub mood: Mood,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityState {
    pub traits: Traits,
    pub mood: Mood,
    /// Bounded, oldest first. Display only; never read by retrieval.
    pub history: VecDeque<MoodSnapshot>,
    /// Time of the last conversational update.
    pub last_input_at: DateTime<Utc>,
}

impl PersonalityState {
    pub fn new(traits: Traits, now: DateTime<Utc>) -> Self {
        Self {
            traits,
            mood: Mood::default(),
            history: VecDeque::new(),
            last_input_at: now,
        }
    }

    pub fn baseline(&self) -> Mood {
        self.traits.baseline_mood()
    }

    /// Apply one conversational turn. Returns the trait deltas actually
    /// applied, in [`TraitName::ALL`] order.
    pub fn apply_signal(
        &mut self,
        signal: &TurnSignal,
        config: &PersonalityConfig,
        now: DateTime<Utc>,
    ) -> [f32; 5] {
        let signal = signal.sanitized();
        let max_delta = config.max_delta.abs();
        let mut applied = [0.0f32; 5];

        for (i, name) in TraitName::ALL.iter().enumerate() {
            let delta = (Traits::signal_component(*name, &signal) * config.learning_rate)
                .clamp(-max_delta, max_delta);
            let value = self.traits.get_mut(*name);
            let before = *value;
            *value = unit(before + delta);
            applied[i] = *value - before;
        }

        let instantaneous = Mood::from_signal(&signal);
        self.mood = self.mood.lerp(&instantaneous, config.mood_smoothing);
        self.last_input_at = now;

        self.history.push_back(MoodSnapshot {
            at: now,
            mood: self.mood,
        });
        while self.history.len() > config.history_len {
            self.history.pop_front();
        }

        applied
    }

    /// Move mood toward the trait baseline in proportion to `elapsed` idle
    /// time. Returns the fraction of the gap that was closed, in [0, 1).
    pub fn decay_toward_baseline(&mut self, elapsed: Duration, config: &PersonalityConfig) -> f32 {
        let window = config.idle_window().as_secs_f32().max(f32::EPSILON);
        let windows = elapsed.as_secs_f32() / window;
        let fraction = 1.0 - (-config.decay_rate * windows).exp();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let baseline = self.baseline();
        self.mood = self.mood.lerp(&baseline, fraction);
        fraction
    }

    /// Natural-language summary, e.g.
    /// "very curious, very organized, somewhat outgoing; currently happy and content".
    pub fn describe(&self) -> String {
        let traits: Vec<String> = TraitName::ALL
            .iter()
            .filter_map(|t| t.describe(self.traits.get(*t)))
            .collect();
        if traits.is_empty() {
            format!("balanced; currently {}", self.mood.label())
        } else {
            format!("{}; currently {}", traits.join(", "), self.mood.label())
        }
    }
}

impl Default for PersonalityState {
    fn default() -> Self {
        Self::new(Traits::default(), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PersonalityConfig {
        PersonalityConfig::default()
    }

    #[test]
    fn test_default_baseline_in_bounds() {
        let state = PersonalityState::default();
        assert!(state.baseline().in_bounds());
        assert!(state.traits.in_bounds());
    }

    #[test]
    fn test_positive_signal_lifts_valence_and_agreeableness() {
        let mut state = PersonalityState::default();
        let before = state.clone();
        state.apply_signal(&TurnSignal::new(0.9, 0.8), &cfg(), Utc::now());

        assert!(state.mood.valence > before.mood.valence);
        assert!(state.traits.agreeableness > before.traits.agreeableness);
        assert!(state.traits.neuroticism < before.traits.neuroticism);
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn test_delta_bounded_by_max_delta() {
        let mut state = PersonalityState::default();
        let mut config = cfg();
        config.learning_rate = 10.0;
        let applied = state.apply_signal(&TurnSignal::new(1.0, 1.0), &config, Utc::now());
        for d in applied {
            assert!(d.abs() <= config.max_delta + 1e-6, "delta {} too large", d);
        }
    }

    #[test]
    fn test_non_finite_signal_is_neutralised() {
        let mut state = PersonalityState::default();
        state.apply_signal(
            &TurnSignal {
                sentiment: f32::NAN,
                engagement: f32::INFINITY,
            },
            &cfg(),
            Utc::now(),
        );
        assert!(state.traits.in_bounds());
        assert!(state.mood.in_bounds());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = PersonalityState::default();
        let mut config = cfg();
        config.history_len = 4;
        for _ in 0..10 {
            state.apply_signal(&TurnSignal::new(0.2, 0.5), &config, Utc::now());
        }
        assert_eq!(state.history.len(), 4);
    }

    #[test]
    fn test_decay_one_window_moves_closer_without_overshoot() {
        let config = cfg();
        let mut state = PersonalityState::default();
        state.mood = Mood::new(0.05, 0.95, 0.1);
        let baseline = state.baseline();
        let before = state.mood.distance(&baseline);

        let fraction = state.decay_toward_baseline(config.idle_window(), &config);

        let after = state.mood.distance(&baseline);
        assert!(fraction > 0.0 && fraction < 1.0);
        assert!(after < before);
        // Each axis stays on the same side of the baseline
        assert!(state.mood.valence <= baseline.valence);
        assert!(state.mood.arousal >= baseline.arousal);
        assert!(state.mood.dominance <= baseline.dominance);
    }

    #[test]
    fn test_decay_zero_elapsed_is_noop() {
        let config = cfg();
        let mut state = PersonalityState::default();
        state.mood = Mood::new(0.1, 0.1, 0.1);
        let before = state.mood;
        state.decay_toward_baseline(Duration::ZERO, &config);
        assert_eq!(state.mood, before);
    }

    #[test]
    fn test_mood_labels() {
        assert_eq!(Mood::new(0.8, 0.5, 0.5).label(), "happy and content");
        assert_eq!(Mood::new(0.8, 0.9, 0.5).label(), "enthusiastic and excited");
        assert_eq!(Mood::new(0.1, 0.9, 0.5).label(), "tense and nervous");
        assert_eq!(Mood::new(0.1, 0.1, 0.5).label(), "tired and lethargic");
    }

    #[test]
    fn test_describe_default() {
        let state = PersonalityState::default();
        assert_eq!(
            state.describe(),
            "somewhat curious, very organized, somewhat outgoing, very friendly, \
             somewhat resilient; currently neutral but attentive"
        );
    }
}
