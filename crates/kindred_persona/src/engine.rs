//! The Personality Engine of one namespace.
//!
//! - `update` applies a conversational turn: bounded trait drift plus a
//!   smoothed mood move
//! - `decay_tick` / `decay_if_idle` relax mood toward the trait baseline
//! - `snapshot` is a consistent copy; concurrent updates are serialized
//!
//! Every update is total: a failing store is logged and the in-memory
//! state still advances.

use chrono::{DateTime, Utc};
use kindred_core::{
    Clock, Mood, MoodSnapshot, Namespace, PersonalityConfig, PersonalityError, PersonalityState,
    PersonalityStore, TurnSignal,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

struct Inner {
    state: PersonalityState,
    /// Idle time before this instant has already been decayed away.
    decayed_until: DateTime<Utc>,
}

pub struct PersonalityEngine {
    namespace: Namespace,
    inner: RwLock<Inner>,
    store: Option<Arc<dyn PersonalityStore>>,
    config: PersonalityConfig,
    clock: Arc<dyn Clock>,

    /// Mood broadcast (the CLI status line subscribes to this)
    mood_tx: watch::Sender<Mood>,
    mood_rx: watch::Receiver<Mood>,
}

impl PersonalityEngine {
    /// A fresh engine with the configured initial traits and nothing
    /// persisted.
    pub fn new(namespace: Namespace, config: PersonalityConfig, clock: Arc<dyn Clock>) -> Self {
        let state = PersonalityState::new(config.initial_traits, clock.now());
        Self::from_state(namespace, state, None, config, clock)
    }

    /// Load the namespace's state from `store`, or start fresh if it has
    /// none yet. Later updates are written back.
    pub async fn open(
        namespace: Namespace,
        store: Arc<dyn PersonalityStore>,
        config: PersonalityConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PersonalityError> {
        config
            .validate()
            .map_err(|e| PersonalityError::Unavailable(format!("{e:#}")))?;
        let loaded = store
            .load_personality(&namespace)
            .await
            .map_err(|e| PersonalityError::Unavailable(format!("{e:#}")))?;

        let state = match loaded {
            Some(state) if state.traits.in_bounds() && state.mood.in_bounds() => {
                tracing::info!(namespace = %namespace, "Personality restored: {}", state.describe());
                state
            }
            Some(_) => {
                return Err(PersonalityError::Unavailable(format!(
                    "stored personality of {namespace} is out of bounds"
                )))
            }
            None => {
                tracing::info!(namespace = %namespace, "No stored personality, starting fresh");
                PersonalityState::new(config.initial_traits, clock.now())
            }
        };
        Ok(Self::from_state(namespace, state, Some(store), config, clock))
    }

    fn from_state(
        namespace: Namespace,
        state: PersonalityState,
        store: Option<Arc<dyn PersonalityStore>>,
        config: PersonalityConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (mood_tx, mood_rx) = watch::channel(state.mood);
        let decayed_until = state.last_input_at;
        Self {
            namespace,
            inner: RwLock::new(Inner {
                state,
                decayed_until,
            }),
            store,
            config,
            clock,
            mood_tx,
            mood_rx,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &PersonalityConfig {
        &self.config
    }

    /// Apply one conversational turn and return the new state.
    ///
    /// Non-finite signal components are treated as neutral. Each trait
    /// moves by at most `max_delta` and stays within [0, 1].
    pub async fn update(&self, signal: TurnSignal) -> PersonalityState {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let deltas = inner.state.apply_signal(&signal, &self.config, now);
        inner.decayed_until = now;
        let state = inner.state.clone();
        self.persist(&state).await;
        drop(inner);

        let _ = self.mood_tx.send(state.mood);
        tracing::debug!(
            namespace = %self.namespace,
            sentiment = signal.sentiment,
            engagement = signal.engagement,
            ?deltas,
            mood = state.mood.label(),
            "Personality updated"
        );
        state
    }

    /// Relax mood toward the trait baseline as if `elapsed` idle time had
    /// passed. Traits are untouched. Idle time up to now counts as
    /// decayed for [`decay_if_idle`](Self::decay_if_idle).
    pub async fn decay_tick(&self, elapsed: Duration) -> PersonalityState {
        let mut inner = self.inner.write().await;
        inner.decayed_until = self.clock.now();
        self.apply_decay(&mut inner, elapsed).await
    }

    async fn apply_decay(&self, inner: &mut Inner, elapsed: Duration) -> PersonalityState {
        let closed = inner.state.decay_toward_baseline(elapsed, &self.config);
        let state = inner.state.clone();
        self.persist(&state).await;

        let _ = self.mood_tx.send(state.mood);
        tracing::trace!(
            namespace = %self.namespace,
            elapsed_secs = elapsed.as_secs_f32(),
            closed,
            "Mood decayed"
        );
        state
    }

    /// Whether no turn arrived within the idle window.
    pub async fn is_idle(&self) -> bool {
        let inner = self.inner.read().await;
        self.idle_since(&inner.state, self.clock.now())
    }

    fn idle_since(&self, state: &PersonalityState, now: DateTime<Utc>) -> bool {
        (now - state.last_input_at)
            .to_std()
            .map_or(false, |quiet| quiet >= self.config.idle_window())
    }

    /// Decay by however much idle time has accrued since the last turn or
    /// the last decay, whichever is later. Does nothing (and returns
    /// `None`) while the user is active.
    pub async fn decay_if_idle(&self) -> Option<PersonalityState> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        if !self.idle_since(&inner.state, now) {
            return None;
        }
        let from = inner.decayed_until.max(inner.state.last_input_at);
        let elapsed = (now - from).to_std().unwrap_or_default();
        if elapsed.is_zero() {
            return None;
        }
        inner.decayed_until = now;
        Some(self.apply_decay(&mut inner, elapsed).await)
    }

    /// Consistent copy of the full state.
    pub async fn snapshot(&self) -> PersonalityState {
        self.inner.read().await.state.clone()
    }

    /// Latest mood without taking the lock.
    pub fn mood(&self) -> Mood {
        *self.mood_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Mood> {
        self.mood_tx.subscribe()
    }

    pub async fn history(&self) -> Vec<MoodSnapshot> {
        self.inner.read().await.state.history.iter().copied().collect()
    }

    pub async fn describe(&self) -> String {
        self.inner.read().await.state.describe()
    }

    async fn persist(&self, state: &PersonalityState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_personality(&self.namespace, state).await {
                tracing::warn!(namespace = %self.namespace, "Failed to persist personality: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kindred_core::{ManualClock, TraitName};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_positive_turn_raises_agreeableness() {
        let engine = PersonalityEngine::new(Namespace::new("a"), PersonalityConfig::default(), clock());
        let before = engine.snapshot().await;
        let after = engine.update(TurnSignal::new(1.0, 1.0)).await;

        let a0 = before.traits.get(TraitName::Agreeableness);
        let a1 = after.traits.get(TraitName::Agreeableness);
        assert!(a1 > a0);
        assert!(a1 - a0 <= engine.config().max_delta + 1e-6);
        assert!(after.mood.valence > before.mood.valence);
        assert_eq!(engine.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_nan_signal_is_neutral() {
        let engine = PersonalityEngine::new(Namespace::new("a"), PersonalityConfig::default(), clock());
        let state = engine.update(TurnSignal::new(f32::NAN, f32::NAN)).await;
        assert!(state.traits.in_bounds());
        assert!(state.mood.in_bounds());
        assert!(state.mood.valence.is_finite());
    }

    #[tokio::test]
    async fn test_decay_if_idle_waits_for_the_window() {
        let clock = clock();
        let engine =
            PersonalityEngine::new(Namespace::new("a"), PersonalityConfig::default(), clock.clone());
        engine.update(TurnSignal::new(-1.0, 1.0)).await;
        assert!(engine.decay_if_idle().await.is_none());
        assert!(!engine.is_idle().await);

        clock.advance(chrono::Duration::minutes(11));
        assert!(engine.is_idle().await);
        let stressed = engine.snapshot().await;
        let relaxed = engine.decay_if_idle().await.expect("idle decay");
        let baseline = relaxed.baseline();
        assert!(relaxed.mood.distance(&baseline) < stressed.mood.distance(&baseline));

        // The same idle stretch is not decayed twice.
        let again = engine.decay_if_idle().await;
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_decay_tick_covers_the_idle_stretch() {
        let clock = clock();
        let engine =
            PersonalityEngine::new(Namespace::new("a"), PersonalityConfig::default(), clock.clone());
        engine.update(TurnSignal::new(-1.0, 1.0)).await;

        clock.advance(chrono::Duration::minutes(11));
        let ticked = engine.decay_tick(Duration::from_secs(11 * 60)).await;
        assert!(engine.decay_if_idle().await.is_none());
        assert_eq!(engine.snapshot().await.mood, ticked.mood);

        // Only time after the tick is decayed later.
        clock.advance(chrono::Duration::minutes(5));
        let later = engine.decay_if_idle().await.expect("idle decay");
        let baseline = later.baseline();
        assert!(later.mood.distance(&baseline) < ticked.mood.distance(&baseline));
    }

    #[tokio::test]
    async fn test_subscribers_see_mood_changes() {
        let engine = PersonalityEngine::new(Namespace::new("a"), PersonalityConfig::default(), clock());
        let mut rx = engine.subscribe();
        let state = engine.update(TurnSignal::new(1.0, 0.9)).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), state.mood);
        assert_eq!(engine.mood(), state.mood);
    }
}
