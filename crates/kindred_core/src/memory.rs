//! Memory entries and the read-side types built from them.

use crate::error::{Degradation, MemoryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

pub type Embedding = Vec<f32>;

/// Closed set of memory kinds. Each kind has its own importance weight
/// and decay factor (see [`crate::PerKind`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Something that happened in a conversation.
    Episodic,
    /// A standing fact about the user or the world.
    Semantic,
    /// An emotionally charged moment.
    Emotional,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 3] = [Self::Episodic, Self::Semantic, Self::Emotional];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Emotional => "emotional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "episodic" => Some(Self::Episodic),
            "semantic" => Some(Self::Semantic),
            "emotional" => Some(Self::Emotional),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single remembered fact, utterance summary or event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub content: String,
    pub kind: MemoryKind,
    /// Computed once at creation; recomputed only when consolidation
    /// rewrites `content`.
    pub embedding: Embedding,
    /// [0, 1]
    pub importance: f32,
    /// [-1, 1]
    pub sentiment: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    /// Undirected: if A links B then B links A.
    pub links: BTreeSet<Uuid>,
    /// Archived entries are kept for audit but excluded from default recall.
    pub archived: bool,
    /// Set when this entry was absorbed by a duplicate merge.
    pub merged_into: Option<Uuid>,
}

impl MemoryEntry {
    pub fn new(
        content: impl Into<String>,
        kind: MemoryKind,
        embedding: Embedding,
        importance: f32,
        sentiment: f32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            kind,
            embedding,
            importance,
            sentiment,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            links: BTreeSet::new(),
            archived: false,
            merged_into: None,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.archived
    }

    /// Check the per-entry invariants. A failure here is a bug, never a
    /// value to be clamped.
    pub fn check_invariants(&self, dimension: usize) -> Result<(), MemoryError> {
        if !self.importance.is_finite() || !(0.0..=1.0).contains(&self.importance) {
            return Err(MemoryError::InvariantViolation(format!(
                "entry {} importance {} outside [0, 1]",
                self.id, self.importance
            )));
        }
        if !self.sentiment.is_finite() || !(-1.0..=1.0).contains(&self.sentiment) {
            return Err(MemoryError::InvariantViolation(format!(
                "entry {} sentiment {} outside [-1, 1]",
                self.id, self.sentiment
            )));
        }
        if self.embedding.len() != dimension {
            return Err(MemoryError::InvariantViolation(format!(
                "entry {} embedding has {} dimensions, expected {}",
                self.id,
                self.embedding.len(),
                dimension
            )));
        }
        if self.links.contains(&self.id) {
            return Err(MemoryError::InvariantViolation(format!(
                "entry {} links to itself",
                self.id
            )));
        }
        Ok(())
    }
}

/// Restrictions applied before ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFilters {
    /// Only these kinds; `None` means every kind.
    pub kinds: Option<BTreeSet<MemoryKind>>,
    /// Only entries created within this window before "now".
    pub recency_window: Option<Duration>,
    pub min_importance: Option<f32>,
    pub include_archived: bool,
}

impl MemoryFilters {
    pub fn kind(mut self, kind: MemoryKind) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).insert(kind);
        self
    }

    pub fn within(mut self, window: Duration) -> Self {
        self.recency_window = Some(window);
        self
    }

    pub fn min_importance(mut self, min: f32) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn include_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }

    pub fn matches(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> bool {
        if entry.archived && !self.include_archived {
            return false;
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&entry.kind) {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if entry.importance < min {
                return false;
            }
        }
        if let Some(window) = self.recency_window {
            let age = (now - entry.created_at).to_std().unwrap_or_default();
            if age > window {
                return false;
            }
        }
        true
    }
}

/// One recalled entry with the numbers it was ranked by.
#[derive(Debug, Clone, Serialize)]
pub struct RecallHit {
    pub entry: MemoryEntry,
    pub similarity: f32,
    pub score: f32,
}

/// Result of a recall: ranked hits, or an empty list plus the reason
/// context quality was degraded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecallOutcome {
    pub hits: Vec<RecallHit>,
    pub degraded: Option<Degradation>,
}

impl RecallOutcome {
    pub fn degraded(reason: Degradation) -> Self {
        Self {
            hits: Vec::new(),
            degraded: Some(reason),
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.hits.iter().map(|hit| &hit.entry)
    }

    pub fn into_entries(self) -> Vec<MemoryEntry> {
        self.hits.into_iter().map(|hit| hit.entry).collect()
    }
}

/// Read-only summary for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Every entry, archived included.
    pub total: usize,
    pub live: usize,
    pub archived: usize,
    /// Live entries per kind.
    pub by_kind: BTreeMap<MemoryKind, usize>,
    /// Undirected links between live entries.
    pub links: usize,
    /// Mean importance over live entries (0 when empty).
    pub average_importance: f32,
}

/// What a consolidation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub pairs_examined: usize,
    pub links_created: usize,
    pub merged: usize,
    /// Merges skipped because the survivor could not be re-embedded.
    pub merges_skipped: usize,
    pub decayed: usize,
    pub archived: usize,
    /// Number of pair sweeps until no further merge happened.
    pub sweeps: usize,
}

impl ConsolidationReport {
    pub fn is_noop(&self) -> bool {
        self.links_created == 0 && self.merged == 0 && self.decayed == 0 && self.archived == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(importance: f32, sentiment: f32) -> MemoryEntry {
        MemoryEntry::new(
            "user likes hiking",
            MemoryKind::Semantic,
            vec![1.0, 0.0, 0.0],
            importance,
            sentiment,
            Utc::now(),
        )
    }

    #[test]
    fn test_kind_round_trip_str() {
        for kind in MemoryKind::ALL {
            assert_eq!(MemoryKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MemoryKind::parse("procedural"), None);
    }

    #[test]
    fn test_invariants_accept_valid_entry() {
        assert!(entry(0.5, -0.3).check_invariants(3).is_ok());
    }

    #[test]
    fn test_invariants_reject_out_of_range() {
        assert!(matches!(
            entry(1.2, 0.0).check_invariants(3),
            Err(MemoryError::InvariantViolation(_))
        ));
        assert!(entry(0.5, -1.5).check_invariants(3).is_err());
        assert!(entry(f32::NAN, 0.0).check_invariants(3).is_err());
        assert!(entry(0.5, 0.0).check_invariants(4).is_err());
    }

    #[test]
    fn test_invariants_reject_self_link() {
        let mut e = entry(0.5, 0.0);
        e.links.insert(e.id);
        assert!(e.check_invariants(3).is_err());
    }

    #[test]
    fn test_filters() {
        let now = Utc::now();
        let mut e = entry(0.4, 0.0);
        e.created_at = now - chrono::Duration::days(10);

        assert!(MemoryFilters::default().matches(&e, now));
        assert!(!MemoryFilters::default().kind(MemoryKind::Episodic).matches(&e, now));
        assert!(MemoryFilters::default().kind(MemoryKind::Semantic).matches(&e, now));
        assert!(!MemoryFilters::default().min_importance(0.5).matches(&e, now));
        assert!(!MemoryFilters::default()
            .within(Duration::from_secs(86_400))
            .matches(&e, now));

        e.archived = true;
        assert!(!MemoryFilters::default().matches(&e, now));
        assert!(MemoryFilters::default().include_archived().matches(&e, now));
    }
}
