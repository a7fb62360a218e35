//! The Memory Manager of one namespace.
//!
//! Entries live in an in-memory view guarded by a `tokio::sync::RwLock`
//! and are written through to a [`MemoryStore`]. Every mutation is
//! persisted before it becomes visible, so a reader never sees a state
//! the store does not have.

use crate::embedding::Embedder;
use crate::heuristics::{extract_preferences, is_memorable};
use crate::index::VectorIndex;
use crate::scoring::{composite_score, initial_importance, recency_decay};
use chrono::{DateTime, Utc};
use kindred_core::{
    Clock, ConsolidationConfig, Degradation, Embedding, KindredConfig, MemoryConfig, MemoryEntry,
    MemoryError, MemoryFilters, MemoryKind, MemoryStats, MemoryStore, Namespace, RecallHit,
    RecallOutcome,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Candidates at least this similar to the query count as the query itself.
const EXACT_MATCH_EPSILON: f32 = 1e-4;

/// One entry a user turn should produce.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnMemory {
    pub content: String,
    pub kind: MemoryKind,
    pub sentiment: f32,
}

/// Entries plus the index built over their embeddings.
pub(crate) struct NamespaceMemory {
    pub(crate) entries: HashMap<Uuid, MemoryEntry>,
    pub(crate) index: VectorIndex,
}

impl NamespaceMemory {
    fn new(dimension: usize) -> Self {
        Self {
            entries: HashMap::new(),
            index: VectorIndex::new(dimension),
        }
    }

    pub(crate) fn upsert(&mut self, entry: MemoryEntry) -> Result<(), MemoryError> {
        self.index.insert(entry.id, &entry.embedding)?;
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    /// Every entry, oldest first. Ties on `created_at` break on id.
    pub(crate) fn sorted_entries(&self) -> Vec<MemoryEntry> {
        let mut entries: Vec<MemoryEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        entries
    }

    pub(crate) fn live_ids_by_age(&self) -> Vec<Uuid> {
        let mut live: Vec<&MemoryEntry> = self.entries.values().filter(|e| e.is_live()).collect();
        live.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        live.into_iter().map(|e| e.id).collect()
    }

    /// Every link must point at a known entry that links back.
    pub(crate) fn check_links(&self) -> Result<(), MemoryError> {
        for entry in self.entries.values() {
            for other in &entry.links {
                let back = self
                    .entries
                    .get(other)
                    .map_or(false, |o| o.links.contains(&entry.id));
                if !back {
                    return Err(MemoryError::InvariantViolation(format!(
                        "link {} -> {} is not symmetric",
                        entry.id, other
                    )));
                }
            }
        }
        Ok(())
    }
}

pub struct MemoryManager {
    pub(crate) namespace: Namespace,
    pub(crate) store: Arc<dyn MemoryStore>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) memory_config: MemoryConfig,
    pub(crate) consolidation_config: ConsolidationConfig,
    pub(crate) embed_timeout: Duration,
    pub(crate) dimension: usize,
    pub(crate) state: RwLock<NamespaceMemory>,
}

impl MemoryManager {
    /// Load a namespace from `store` and index it.
    ///
    /// Fails with `InvariantViolation` if any stored entry is corrupt
    /// rather than silently repairing it.
    pub async fn open(
        namespace: Namespace,
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn Embedder>,
        config: &KindredConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MemoryError> {
        config
            .memory
            .validate()
            .and_then(|_| config.consolidation.validate())
            .map_err(|e| MemoryError::InvalidInput(format!("{e:#}")))?;

        let dimension = embedder.dimension();
        if dimension != config.embedding.dimension {
            return Err(MemoryError::InvalidInput(format!(
                "embedder '{}' produces {} dimensions but embedding.dimension is {}",
                embedder.name(),
                dimension,
                config.embedding.dimension
            )));
        }

        let entries = store
            .load_entries(&namespace)
            .await
            .map_err(MemoryError::storage)?;

        let mut state = NamespaceMemory::new(dimension);
        for entry in entries {
            entry.check_invariants(dimension)?;
            state.upsert(entry)?;
        }
        state.check_links()?;

        info!(
            namespace = %namespace,
            entries = state.entries.len(),
            embedder = embedder.name(),
            "Memory namespace opened"
        );

        Ok(Self {
            namespace,
            store,
            embedder,
            clock,
            memory_config: config.memory.clone(),
            consolidation_config: config.consolidation.clone(),
            embed_timeout: config.embedding.timeout(),
            dimension,
            state: RwLock::new(state),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.memory_config
    }

    /// Embed `text` within the configured timeout.
    pub(crate) async fn embed(&self, text: &str) -> Result<Embedding, MemoryError> {
        let embedding = match tokio::time::timeout(self.embed_timeout, self.embedder.embed(text))
            .await
        {
            Err(_) => return Err(MemoryError::EmbeddingTimeout(self.embed_timeout)),
            Ok(Err(e)) => return Err(MemoryError::embedding(e)),
            Ok(Ok(v)) => v,
        };
        if embedding.len() != self.dimension {
            return Err(MemoryError::Embedding(format!(
                "provider returned {} dimensions, expected {}",
                embedding.len(),
                self.dimension
            )));
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(MemoryError::Embedding(
                "provider returned a non-finite component".into(),
            ));
        }
        Ok(embedding)
    }

    /// Store a new entry.
    ///
    /// Importance is derived from `|sentiment_hint|`, novelty against the
    /// closest live entry, and the kind weight. The entry is visible to
    /// recall only once the store has accepted it.
    pub async fn remember(
        &self,
        content: &str,
        kind: MemoryKind,
        sentiment_hint: f32,
    ) -> Result<MemoryEntry, MemoryError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryError::InvalidInput("content is empty".into()));
        }
        if !sentiment_hint.is_finite() || !(-1.0..=1.0).contains(&sentiment_hint) {
            return Err(MemoryError::InvalidInput(format!(
                "sentiment {sentiment_hint} outside [-1, 1]"
            )));
        }

        let embedding = self.embed(content).await?;
        if embedding.iter().all(|x| *x == 0.0) {
            return Err(MemoryError::InvalidInput(
                "content has no indexable words".into(),
            ));
        }
        let now = self.clock.now();

        let mut state = self.state.write().await;
        let closest = state
            .index
            .max_similarity(&embedding, |id, _| {
                state.entries.get(id).map_or(false, |e| e.is_live())
            })
            .unwrap_or(0.0);
        let novelty = 1.0 - closest.max(0.0);
        let importance = initial_importance(sentiment_hint, novelty, kind, &self.memory_config);

        let entry = MemoryEntry::new(content, kind, embedding, importance, sentiment_hint, now);
        entry.check_invariants(self.dimension)?;

        self.store
            .insert_entry(&self.namespace, &entry)
            .await
            .map_err(MemoryError::storage)?;
        state.upsert(entry.clone())?;

        debug!(
            namespace = %self.namespace,
            id = %entry.id,
            kind = %kind,
            importance = entry.importance,
            novelty,
            "Remembered"
        );
        Ok(entry)
    }

    /// What is worth keeping from one user turn, in storage order.
    ///
    /// Short turns yield nothing. A charged turn is kept as emotional,
    /// anything else as episodic. Stated likes and dislikes additionally
    /// become semantic facts.
    pub fn plan_turn(&self, message: &str, sentiment: f32) -> Vec<TurnMemory> {
        let sentiment = if sentiment.is_finite() {
            sentiment.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        if !is_memorable(message, self.memory_config.min_content_words) {
            debug!(namespace = %self.namespace, "Turn too short to remember");
            return Vec::new();
        }

        let kind = if sentiment.abs() >= self.memory_config.emotional_threshold {
            MemoryKind::Emotional
        } else {
            MemoryKind::Episodic
        };
        let mut plan = vec![TurnMemory {
            content: message.trim().to_string(),
            kind,
            sentiment,
        }];
        plan.extend(extract_preferences(message).into_iter().map(|preference| {
            TurnMemory {
                content: preference.statement(),
                kind: MemoryKind::Semantic,
                sentiment: preference.sentiment(),
            }
        }));
        plan
    }

    /// Store everything [`plan_turn`](Self::plan_turn) yields for `message`.
    pub async fn remember_turn(
        &self,
        message: &str,
        sentiment: f32,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let mut stored = Vec::new();
        for item in self.plan_turn(message, sentiment) {
            stored.push(self.remember(&item.content, item.kind, item.sentiment).await?);
        }
        Ok(stored)
    }

    /// Up to `k` entries relevant to `query`, best first.
    ///
    /// Candidates are the nearest neighbours passing `filters` and the
    /// similarity floor, re-ranked by
    /// `α·similarity + β·importance + γ·recency`; ties prefer the more
    /// frequently accessed entry. Returned entries get their access
    /// statistics bumped.
    ///
    /// Provider and store trouble never fails the call: the result is
    /// empty and carries the [`Degradation`].
    pub async fn recall(
        &self,
        query: &str,
        k: usize,
        filters: &MemoryFilters,
    ) -> Result<RecallOutcome, MemoryError> {
        if k == 0 {
            return Ok(RecallOutcome::default());
        }

        let query_embedding = match self.embed(query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                return match err.degradation() {
                    Some(reason) => {
                        warn!(namespace = %self.namespace, "Recall degraded: {}", err);
                        Ok(RecallOutcome::degraded(reason))
                    }
                    None => Err(err),
                }
            }
        };

        let now = self.clock.now();
        let ranked = {
            let state = self.state.read().await;
            self.rank(&state, query, &query_embedding, k, filters, now)
        };
        if ranked.is_empty() {
            return Ok(RecallOutcome::default());
        }

        let mut state = self.state.write().await;
        let mut touched = Vec::with_capacity(ranked.len());
        let mut hits = Vec::with_capacity(ranked.len());
        for hit in ranked {
            // Consolidation may have archived the entry since ranking.
            let Some(current) = state.entries.get(&hit.entry.id) else {
                continue;
            };
            if !filters.matches(current, now) {
                continue;
            }
            let mut entry = current.clone();
            entry.last_accessed_at = now;
            entry.access_count += 1;
            touched.push(entry.clone());
            hits.push(RecallHit { entry, ..hit });
        }

        if let Err(err) = self.store.save_entries(&self.namespace, &touched).await {
            warn!(namespace = %self.namespace, "Recall degraded, store unavailable: {:#}", err);
            return Ok(RecallOutcome::degraded(Degradation::StoreUnavailable {
                reason: format!("{err:#}"),
            }));
        }
        for entry in touched {
            state.entries.insert(entry.id, entry);
        }

        debug!(namespace = %self.namespace, hits = hits.len(), "Recalled");
        Ok(RecallOutcome {
            hits,
            degraded: None,
        })
    }

    /// Exact matches of the query come first, the rest by composite score.
    fn rank(
        &self,
        state: &NamespaceMemory,
        query_text: &str,
        query: &[f32],
        k: usize,
        filters: &MemoryFilters,
        now: DateTime<Utc>,
    ) -> Vec<RecallHit> {
        let floor = self.memory_config.similarity_floor;
        let pool = self.memory_config.candidate_pool.max(k);
        let neighbors = state.index.nearest(query, pool, |id, similarity| {
            similarity >= floor
                && state
                    .entries
                    .get(id)
                    .map_or(false, |e| filters.matches(e, now))
        });

        let mut hits: Vec<RecallHit> = neighbors
            .into_iter()
            .filter_map(|n| {
                let entry = state.entries.get(&n.id)?;
                let recency = recency_decay(
                    now - entry.created_at,
                    self.memory_config.recency_half_life_hours,
                );
                let score = composite_score(
                    n.similarity,
                    entry.importance,
                    recency,
                    &self.memory_config.recall_weights,
                );
                Some(RecallHit {
                    entry: entry.clone(),
                    similarity: n.similarity,
                    score,
                })
            })
            .collect();

        let query_text = query_text.trim();
        let is_exact = |hit: &RecallHit| {
            hit.entry.content == query_text || hit.similarity >= 1.0 - EXACT_MATCH_EPSILON
        };
        hits.sort_by(|a, b| {
            is_exact(b)
                .cmp(&is_exact(a))
                .then(b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
                .then(b.entry.access_count.cmp(&a.entry.access_count))
        });
        hits.truncate(k);
        hits
    }

    pub async fn get(&self, id: &Uuid) -> Option<MemoryEntry> {
        self.state.read().await.entries.get(id).cloned()
    }

    /// Non-archived entries, oldest first.
    pub async fn live_entries(&self) -> Vec<MemoryEntry> {
        let state = self.state.read().await;
        state
            .sorted_entries()
            .into_iter()
            .filter(|e| e.is_live())
            .collect()
    }

    /// Every entry including archived ones, oldest first.
    pub async fn all_entries(&self) -> Vec<MemoryEntry> {
        self.state.read().await.sorted_entries()
    }

    pub async fn stats(&self) -> MemoryStats {
        let state = self.state.read().await;
        let mut stats = MemoryStats {
            total: state.entries.len(),
            by_kind: BTreeMap::new(),
            ..Default::default()
        };
        let mut importance_sum = 0.0f32;
        let mut links: HashSet<(Uuid, Uuid)> = HashSet::new();

        for entry in state.entries.values() {
            if !entry.is_live() {
                stats.archived += 1;
                continue;
            }
            stats.live += 1;
            *stats.by_kind.entry(entry.kind).or_insert(0) += 1;
            importance_sum += entry.importance;
            for other in &entry.links {
                let live_other = state.entries.get(other).map_or(false, |o| o.is_live());
                if live_other {
                    links.insert(if entry.id < *other {
                        (entry.id, *other)
                    } else {
                        (*other, entry.id)
                    });
                }
            }
        }

        stats.links = links.len();
        if stats.live > 0 {
            stats.average_importance = importance_sum / stats.live as f32;
        }
        stats
    }

    /// Roll the namespace back to its last consolidation checkpoint.
    ///
    /// Entries created after the checkpoint are archived, never deleted.
    /// Returns the checkpoint time, or `None` if there is none.
    pub async fn restore_last_checkpoint(&self) -> Result<Option<DateTime<Utc>>, MemoryError> {
        let mut state = self.state.write().await;
        let Some(checkpoint) = self
            .store
            .latest_checkpoint(&self.namespace)
            .await
            .map_err(MemoryError::storage)?
        else {
            return Ok(None);
        };

        let mut restored = NamespaceMemory::new(self.dimension);
        for entry in &checkpoint.entries {
            entry.check_invariants(self.dimension)?;
            restored.upsert(entry.clone())?;
        }
        let mut orphaned = 0usize;
        for entry in state.entries.values() {
            if !restored.entries.contains_key(&entry.id) {
                let mut entry = entry.clone();
                entry.archived = true;
                // Links to it did not exist at checkpoint time.
                entry.links.clear();
                restored.upsert(entry)?;
                orphaned += 1;
            }
        }
        restored.check_links()?;

        self.store
            .save_entries(&self.namespace, &restored.sorted_entries())
            .await
            .map_err(MemoryError::storage)?;
        *state = restored;

        info!(
            namespace = %self.namespace,
            checkpoint = %checkpoint.completed_at,
            archived_since = orphaned,
            "Restored consolidation checkpoint"
        );
        Ok(Some(checkpoint.completed_at))
    }
}
