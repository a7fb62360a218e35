use chrono::{TimeZone, Utc};
use kindred_core::{
    ManualClock, Namespace, PersonalityConfig, PersonalityError, PersonalityStore, TraitName,
    Traits, TurnSignal,
};
use kindred_memory::{InMemoryStore, SqliteStore};
use kindred_persona::PersonalityEngine;
use std::sync::Arc;
use tempfile::TempDir;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
    ))
}

#[tokio::test]
async fn thousand_extreme_turns_stay_bounded() {
    let engine = PersonalityEngine::new(Namespace::new("a"), PersonalityConfig::default(), clock());
    let max_delta = engine.config().max_delta;
    let mut previous = engine.snapshot().await.traits;

    for i in 0..1000 {
        let signal = if i % 2 == 0 {
            TurnSignal::new(1.0, 1.0)
        } else {
            TurnSignal::new(-1.0, 0.0)
        };
        let state = engine.update(signal).await;
        assert!(state.traits.in_bounds());
        assert!(state.mood.in_bounds());
        for name in TraitName::ALL {
            let moved = (state.traits.get(name) - previous.get(name)).abs();
            assert!(moved <= max_delta + 1e-6, "{name:?} moved {moved}");
        }
        previous = state.traits;
    }
    assert_eq!(
        engine.history().await.len(),
        engine.config().history_len,
        "history is bounded"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_are_serialized() {
    let engine = Arc::new(PersonalityEngine::new(
        Namespace::new("a"),
        PersonalityConfig::default(),
        clock(),
    ));
    let start = engine.snapshot().await.traits.get(TraitName::Agreeableness);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.update(TurnSignal::new(0.5, 0.5)).await;
            let snapshot = engine.snapshot().await;
            assert!(snapshot.traits.in_bounds());
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 20 turns of +0.01 each, none lost to a race.
    let end = engine.snapshot().await.traits.get(TraitName::Agreeableness);
    assert!((end - (start + 20.0 * 0.01)).abs() < 1e-4, "{start} -> {end}");
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kindred.db");
    let ns = Namespace::new("alice");

    let before = {
        let store = Arc::new(SqliteStore::new(&path).await.unwrap());
        let engine = PersonalityEngine::open(ns.clone(), store, PersonalityConfig::default(), clock())
            .await
            .unwrap();
        for _ in 0..5 {
            engine.update(TurnSignal::new(0.8, 0.9)).await;
        }
        engine.snapshot().await
    };

    let store = Arc::new(SqliteStore::new(&path).await.unwrap());
    let engine = PersonalityEngine::open(ns, store, PersonalityConfig::default(), clock())
        .await
        .unwrap();
    let after = engine.snapshot().await;
    assert_eq!(after.traits, before.traits);
    assert_eq!(after.mood, before.mood);
    assert_eq!(after.history.len(), 5);
}

#[tokio::test]
async fn store_outage_does_not_block_updates() {
    let store = Arc::new(InMemoryStore::new());
    let engine = PersonalityEngine::open(
        Namespace::new("alice"),
        store.clone(),
        PersonalityConfig::default(),
        clock(),
    )
    .await
    .unwrap();

    store.set_offline(true);
    let before = engine.snapshot().await;
    let after = engine.update(TurnSignal::new(1.0, 1.0)).await;
    assert_ne!(after.traits, before.traits, "update is total");

    store.set_offline(false);
    engine.update(TurnSignal::new(1.0, 1.0)).await;
    let saved = store
        .load_personality(&Namespace::new("alice"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.history.len(), 2);
}

#[tokio::test]
async fn open_reports_unavailable_store() {
    let store = Arc::new(InMemoryStore::new());
    store.set_offline(true);
    let result = PersonalityEngine::open(
        Namespace::new("alice"),
        store,
        PersonalityConfig::default(),
        clock(),
    )
    .await;
    assert!(matches!(result, Err(PersonalityError::Unavailable(_))));
}

#[tokio::test]
async fn configured_initial_traits_are_used() {
    let config = PersonalityConfig {
        initial_traits: Traits {
            openness: 0.2,
            conscientiousness: 0.3,
            extraversion: 0.9,
            agreeableness: 0.5,
            neuroticism: 0.1,
        },
        ..Default::default()
    };
    let engine = PersonalityEngine::new(Namespace::new("a"), config, clock());
    let state = engine.snapshot().await;
    assert_eq!(state.traits.get(TraitName::Extraversion), 0.9);
    assert!(engine.describe().await.contains("outgoing"));
}
