//! Persistence seams.
//!
//! The Memory Manager and Personality Engine talk to storage only through
//! these traits. Adapters return `anyhow::Result`; the components convert
//! failures into their typed errors at the boundary.

use crate::memory::{ConsolidationReport, MemoryEntry};
use crate::personality::PersonalityState;
use crate::Namespace;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every entry of a namespace as it stood when a consolidation pass
/// completed. The recovery point for [`MemoryStore::latest_checkpoint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationCheckpoint {
    pub completed_at: DateTime<Utc>,
    pub report: ConsolidationReport,
    pub entries: Vec<MemoryEntry>,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// All entries of the namespace, archived included, links populated.
    async fn load_entries(&self, namespace: &Namespace) -> Result<Vec<MemoryEntry>>;

    async fn insert_entry(&self, namespace: &Namespace, entry: &MemoryEntry) -> Result<()>;

    /// Upsert several entries atomically: all rows and their links, or none.
    async fn save_entries(&self, namespace: &Namespace, entries: &[MemoryEntry]) -> Result<()>;

    async fn record_checkpoint(
        &self,
        namespace: &Namespace,
        checkpoint: &ConsolidationCheckpoint,
    ) -> Result<()>;

    async fn latest_checkpoint(&self, namespace: &Namespace)
        -> Result<Option<ConsolidationCheckpoint>>;
}

#[async_trait]
pub trait PersonalityStore: Send + Sync {
    async fn load_personality(&self, namespace: &Namespace) -> Result<Option<PersonalityState>>;

    async fn save_personality(&self, namespace: &Namespace, state: &PersonalityState)
        -> Result<()>;
}
