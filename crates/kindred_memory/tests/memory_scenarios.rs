//! End-to-end memory behaviour against the SQLite store.

use chrono::{Duration, TimeZone, Utc};
use kindred_core::{KindredConfig, ManualClock, MemoryFilters, MemoryKind, Namespace};
use kindred_memory::mock::LexiconEmbedder;
use kindred_memory::{MemoryManager, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;

fn config() -> KindredConfig {
    let mut config = KindredConfig::default();
    config.embedding.dimension = LexiconEmbedder::DIMENSION;
    config
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
    ))
}

async fn open(store: &SqliteStore, namespace: &str, clock: Arc<ManualClock>) -> MemoryManager {
    MemoryManager::open(
        Namespace::new(namespace),
        Arc::new(store.clone()),
        Arc::new(LexiconEmbedder::new()),
        &config(),
        clock,
    )
    .await
    .expect("open namespace")
}

#[tokio::test]
async fn outdoor_query_finds_hiking_not_weather() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::new(dir.path().join("kindred.db")).await.unwrap();
    let clock = clock();
    let memory = open(&store, "alice", clock.clone()).await;

    memory
        .remember("User likes hiking", MemoryKind::Semantic, 0.5)
        .await
        .unwrap();
    clock.advance(Duration::minutes(1));
    memory
        .remember("User asked about the weather", MemoryKind::Episodic, 0.0)
        .await
        .unwrap();

    let outcome = memory
        .recall("outdoor activities", 1, &MemoryFilters::default())
        .await
        .unwrap();
    assert_eq!(outcome.len(), 1);
    assert_eq!(outcome.hits[0].entry.content, "User likes hiking");
}

#[tokio::test]
async fn paraphrased_facts_merge_into_one() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::new(dir.path().join("kindred.db")).await.unwrap();
    let clock = clock();
    let memory = open(&store, "alice", clock.clone()).await;

    let first = memory
        .remember("User has a dog named Max", MemoryKind::Semantic, 0.3)
        .await
        .unwrap();
    clock.advance(Duration::minutes(1));
    let second = memory
        .remember("User's dog is called Max", MemoryKind::Semantic, 0.3)
        .await
        .unwrap();

    let report = memory.consolidate().await.unwrap();
    assert_eq!(report.merged, 1);

    let live = memory.live_entries().await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, first.id);
    assert_eq!(live[0].importance, first.importance.max(second.importance));

    let outcome = memory
        .recall("dog", 5, &MemoryFilters::default())
        .await
        .unwrap();
    assert_eq!(outcome.len(), 1);
    assert!(outcome.hits[0].entry.content.contains("Max"));

    // The merge survives a restart, and the absorbed entry is kept for audit.
    drop(memory);
    let reopened = open(&store, "alice", clock).await;
    let all = reopened.all_entries().await;
    assert_eq!(all.len(), 2);
    let absorbed = all.iter().find(|e| e.id == second.id).unwrap();
    assert!(absorbed.archived);
    assert_eq!(absorbed.merged_into, Some(first.id));
}

#[tokio::test]
async fn entries_and_links_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kindred.db");
    let clock = clock();

    let (hiking, sam) = {
        let store = SqliteStore::new(&path).await.unwrap();
        let memory = open(&store, "alice", clock.clone()).await;
        let hiking = memory
            .remember("User likes hiking", MemoryKind::Semantic, 0.5)
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        let sam = memory
            .remember("User enjoys hiking with Sam", MemoryKind::Semantic, 0.4)
            .await
            .unwrap();
        let report = memory.consolidate().await.unwrap();
        assert_eq!(report.links_created, 1);
        (hiking, sam)
    };

    let store = SqliteStore::new(&path).await.unwrap();
    let memory = open(&store, "alice", clock).await;
    let stats = memory.stats().await;
    assert_eq!(stats.live, 2);
    assert_eq!(stats.links, 1);

    let loaded = memory.get(&hiking.id).await.unwrap();
    assert_eq!(loaded.content, hiking.content);
    assert_eq!(loaded.kind, hiking.kind);
    assert_eq!(loaded.embedding, hiking.embedding);
    assert!((loaded.importance - hiking.importance).abs() < 1e-6);
    assert!(loaded.links.contains(&sam.id));
}

#[tokio::test]
async fn namespaces_do_not_share_memories() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::new(dir.path().join("kindred.db")).await.unwrap();
    let alice = open(&store, "alice", clock()).await;
    let bob = open(&store, "bob", clock()).await;

    alice
        .remember("User has a dog named Max", MemoryKind::Semantic, 0.3)
        .await
        .unwrap();

    let outcome = bob
        .recall("dog", 5, &MemoryFilters::default())
        .await
        .unwrap();
    assert!(outcome.is_empty());
    assert!(outcome.degraded.is_none());
    assert_eq!(bob.stats().await.total, 0);
    assert_eq!(alice.stats().await.total, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_remember_and_recall() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::new(dir.path().join("kindred.db")).await.unwrap();
    let memory = Arc::new(open(&store, "alice", clock()).await);

    let topics = ["hiking", "camping", "weather", "dog", "exam", "trail", "rain", "puppy"];
    let mut handles = Vec::new();
    for (i, topic) in topics.iter().enumerate() {
        let memory = memory.clone();
        let topic = topic.to_string();
        handles.push(tokio::spawn(async move {
            memory
                .remember(&format!("note {i} about {topic}"), MemoryKind::Episodic, 0.1)
                .await
                .unwrap();
            let outcome = memory
                .recall(&topic, 3, &MemoryFilters::default())
                .await
                .unwrap();
            assert!(outcome.len() <= 3);
            assert!(outcome.degraded.is_none());
        }));
    }
    let consolidator = {
        let memory = memory.clone();
        tokio::spawn(async move { memory.consolidate().await.unwrap() })
    };
    for handle in handles {
        handle.await.unwrap();
    }
    consolidator.await.unwrap();

    let stats = memory.stats().await;
    assert_eq!(stats.total, topics.len());
    for entry in memory.all_entries().await {
        for other in &entry.links {
            let back = memory.get(other).await.unwrap();
            assert!(back.links.contains(&entry.id), "links stay symmetric");
        }
    }
}

#[tokio::test]
async fn hiking_outranks_weather_and_named_dog_duplicates_merge() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::new(dir.path().join("kindred.db")).await.unwrap();
    let clock = clock();
    let memory = open(&store, "alice", clock.clone()).await;

    for (content, kind, sentiment) in [
        ("user likes hiking", MemoryKind::Semantic, 0.6),
        ("user felt sad about exam", MemoryKind::Emotional, -0.5),
        ("discussed weather", MemoryKind::Episodic, 0.0),
    ] {
        memory.remember(content, kind, sentiment).await.unwrap();
        clock.advance(Duration::seconds(30));
    }

    let outcome = memory
        .recall("outdoor activities", 2, &MemoryFilters::default())
        .await
        .unwrap();
    let contents: Vec<&str> = outcome.entries().map(|e| e.content.as_str()).collect();
    assert_eq!(contents.first(), Some(&"user likes hiking"));
    let weather = contents.iter().position(|c| *c == "discussed weather");
    assert!(weather.map_or(true, |pos| pos > 0));

    let named = memory
        .remember("user's dog is named Max", MemoryKind::Semantic, 0.2)
        .await
        .unwrap();
    let called = memory
        .remember("user has a dog called Max", MemoryKind::Semantic, 0.4)
        .await
        .unwrap();
    let report = memory.consolidate().await.unwrap();
    assert_eq!(report.merged, 1);

    let dogs: Vec<_> = memory
        .live_entries()
        .await
        .into_iter()
        .filter(|e| e.content.contains("Max"))
        .collect();
    assert_eq!(dogs.len(), 1);
    assert_eq!(dogs[0].importance, named.importance.max(called.importance));
}
