//! Retrieval Composer: the read path the conversation engine calls once
//! per turn.
//!
//! Memories and personality are fetched concurrently. A degraded recall
//! (empty memories plus a reason) is still a package; an outright failure
//! of either side fails the whole composition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kindred_core::{
    Clock, Degradation, MemoryError, MemoryFilters, PersonalityError, PersonalityState, RecallHit,
    RecallOutcome,
};
use kindred_memory::MemoryManager;
use kindred_persona::PersonalityEngine;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Personality(#[from] PersonalityError),
}

/// Read side of the Memory Manager.
#[async_trait]
pub trait MemoryRecall: Send + Sync {
    async fn recall(
        &self,
        query: &str,
        k: usize,
        filters: &MemoryFilters,
    ) -> Result<RecallOutcome, MemoryError>;
}

#[async_trait]
impl MemoryRecall for MemoryManager {
    async fn recall(
        &self,
        query: &str,
        k: usize,
        filters: &MemoryFilters,
    ) -> Result<RecallOutcome, MemoryError> {
        MemoryManager::recall(self, query, k, filters).await
    }
}

/// Read side of the Personality Engine.
#[async_trait]
pub trait PersonalitySource: Send + Sync {
    async fn personality(&self) -> Result<PersonalityState, PersonalityError>;
}

#[async_trait]
impl PersonalitySource for PersonalityEngine {
    async fn personality(&self) -> Result<PersonalityState, PersonalityError> {
        Ok(self.snapshot().await)
    }
}

/// Everything the conversation engine needs to build its prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPackage {
    /// Ranked, best first.
    pub memories: Vec<RecallHit>,
    pub personality: PersonalityState,
    /// Set when memories are empty because recall degraded.
    pub degraded: Option<Degradation>,
    pub composed_at: DateTime<Utc>,
}

impl ContextPackage {
    /// Plain-text fragment for a system prompt.
    pub fn render(&self) -> String {
        let mut out = format!("Personality: {}\n", self.personality.describe());
        if self.memories.is_empty() {
            out.push_str("Relevant memories: none\n");
        } else {
            out.push_str("Relevant memories:\n");
            for hit in &self.memories {
                out.push_str(&format!(
                    "- [{}] {} (importance {:.2})\n",
                    hit.entry.kind, hit.entry.content, hit.entry.importance
                ));
            }
        }
        if let Some(reason) = &self.degraded {
            out.push_str(&format!("(memory degraded: {})\n", reason.describe()));
        }
        out
    }
}

pub struct RetrievalComposer {
    memory: Arc<dyn MemoryRecall>,
    personality: Arc<dyn PersonalitySource>,
    clock: Arc<dyn Clock>,
    k: usize,
    filters: MemoryFilters,
}

impl RetrievalComposer {
    pub fn new(
        memory: Arc<dyn MemoryRecall>,
        personality: Arc<dyn PersonalitySource>,
        clock: Arc<dyn Clock>,
        k: usize,
    ) -> Self {
        Self {
            memory,
            personality,
            clock,
            k,
            filters: MemoryFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: MemoryFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Recall and snapshot concurrently and bundle the results.
    ///
    /// Propagates the first failure of either dependency; never returns a
    /// package with a silently missing half.
    pub async fn compose(&self, query: &str) -> Result<ContextPackage, ContextError> {
        let recall = async {
            self.memory
                .recall(query, self.k, &self.filters)
                .await
                .map_err(ContextError::from)
        };
        let personality = async {
            self.personality
                .personality()
                .await
                .map_err(ContextError::from)
        };
        let (outcome, personality) = tokio::try_join!(recall, personality)?;

        if let Some(reason) = &outcome.degraded {
            tracing::warn!("Composing without memories: {}", reason.describe());
        }
        tracing::debug!(
            memories = outcome.len(),
            mood = personality.mood.label(),
            "Context composed"
        );
        Ok(ContextPackage {
            memories: outcome.hits,
            personality,
            degraded: outcome.degraded,
            composed_at: self.clock.now(),
        })
    }
}
