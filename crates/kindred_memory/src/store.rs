//! Process-local store for tests and `--ephemeral` sessions.

use anyhow::Result;
use async_trait::async_trait;
use kindred_core::{
    ConsolidationCheckpoint, MemoryEntry, MemoryStore, Namespace, PersonalityState,
    PersonalityStore,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Records {
    entries: BTreeMap<Uuid, MemoryEntry>,
    checkpoints: Vec<ConsolidationCheckpoint>,
    personality: Option<PersonalityState>,
}

/// Keeps everything in memory. Can be switched offline to exercise the
/// degraded paths of its callers.
#[derive(Default)]
pub struct InMemoryStore {
    namespaces: RwLock<HashMap<Namespace, Records>>,
    offline: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails as if the database were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("in-memory store is offline");
        }
        Ok(())
    }

    pub async fn checkpoint_count(&self, namespace: &Namespace) -> usize {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map_or(0, |r| r.checkpoints.len())
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn load_entries(&self, namespace: &Namespace) -> Result<Vec<MemoryEntry>> {
        self.check_online()?;
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(namespace)
            .map(|r| r.entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_entry(&self, namespace: &Namespace, entry: &MemoryEntry) -> Result<()> {
        self.save_entries(namespace, std::slice::from_ref(entry)).await
    }

    async fn save_entries(&self, namespace: &Namespace, entries: &[MemoryEntry]) -> Result<()> {
        self.check_online()?;
        let mut namespaces = self.namespaces.write().await;
        let records = namespaces.entry(namespace.clone()).or_default();
        for entry in entries {
            records.entries.insert(entry.id, entry.clone());
        }
        Ok(())
    }

    async fn record_checkpoint(
        &self,
        namespace: &Namespace,
        checkpoint: &ConsolidationCheckpoint,
    ) -> Result<()> {
        self.check_online()?;
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(namespace.clone())
            .or_default()
            .checkpoints
            .push(checkpoint.clone());
        Ok(())
    }

    async fn latest_checkpoint(
        &self,
        namespace: &Namespace,
    ) -> Result<Option<ConsolidationCheckpoint>> {
        self.check_online()?;
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(namespace)
            .and_then(|r| r.checkpoints.last().cloned()))
    }
}

#[async_trait]
impl PersonalityStore for InMemoryStore {
    async fn load_personality(&self, namespace: &Namespace) -> Result<Option<PersonalityState>> {
        self.check_online()?;
        let namespaces = self.namespaces.read().await;
        Ok(namespaces.get(namespace).and_then(|r| r.personality.clone()))
    }

    async fn save_personality(&self, namespace: &Namespace, state: &PersonalityState) -> Result<()> {
        self.check_online()?;
        let mut namespaces = self.namespaces.write().await;
        namespaces.entry(namespace.clone()).or_default().personality = Some(state.clone());
        Ok(())
    }
}
