//! Offline consolidation: link related entries, merge near-duplicates,
//! decay what nobody asks about.
//!
//! A pass holds the namespace write lock for its whole duration, so
//! concurrent recalls wait rather than see a half-merged graph. Each merge
//! and each decay is persisted as its own atomic batch before it is
//! applied in memory; cancelling between pairs leaves a consistent graph.

use crate::manager::{MemoryManager, NamespaceMemory};
use chrono::{DateTime, Utc};
use kindred_core::{
    ConsolidationCheckpoint, ConsolidationConfig, ConsolidationReport, MemoryEntry, MemoryError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Join two contents, dropping one if it already contains the other.
/// The result never exceeds `max_chars` characters.
pub fn merge_content(survivor: &str, absorbed: &str, max_chars: usize) -> String {
    let s = survivor.to_lowercase();
    let a = absorbed.to_lowercase();
    let joined = if s.contains(&a) {
        survivor.to_string()
    } else if a.contains(&s) {
        absorbed.to_string()
    } else {
        format!("{survivor}; {absorbed}")
    };
    if joined.chars().count() > max_chars {
        joined.chars().take(max_chars).collect()
    } else {
        joined
    }
}

/// Which of two duplicates survives: higher importance, then the older,
/// then the lower id.
pub fn pick_survivor<'a>(
    a: &'a MemoryEntry,
    b: &'a MemoryEntry,
) -> (&'a MemoryEntry, &'a MemoryEntry) {
    let a_wins = match a.importance.partial_cmp(&b.importance) {
        Some(std::cmp::Ordering::Greater) => true,
        Some(std::cmp::Ordering::Less) => false,
        _ => (a.created_at, a.id) <= (b.created_at, b.id),
    };
    if a_wins {
        (a, b)
    } else {
        (b, a)
    }
}

/// Fold `absorbed` into `survivor`.
///
/// Returns the new survivor (embedding untouched; the caller re-embeds
/// when content changed) and the archived absorbed entry.
pub fn merge_entries(
    survivor: &MemoryEntry,
    absorbed: &MemoryEntry,
    max_chars: usize,
) -> (MemoryEntry, MemoryEntry) {
    let mut merged = survivor.clone();
    merged.content = merge_content(&survivor.content, &absorbed.content, max_chars);
    merged.importance = survivor.importance.max(absorbed.importance);

    let weight = survivor.importance + absorbed.importance;
    if weight > 0.0 {
        merged.sentiment = ((survivor.sentiment * survivor.importance
            + absorbed.sentiment * absorbed.importance)
            / weight)
            .clamp(-1.0, 1.0);
    }

    merged.created_at = survivor.created_at.min(absorbed.created_at);
    merged.last_accessed_at = survivor.last_accessed_at.max(absorbed.last_accessed_at);
    merged.access_count = survivor.access_count + absorbed.access_count;
    merged.links.extend(absorbed.links.iter().copied());
    merged.links.remove(&survivor.id);
    merged.links.remove(&absorbed.id);

    let mut archived = absorbed.clone();
    archived.archived = true;
    archived.merged_into = Some(survivor.id);
    archived.links.clear();

    (merged, archived)
}

/// Importance after one decay step.
///
/// Core entries (at or above `core_floor`) never fall below it; nothing
/// falls below `importance_floor`; decay never raises importance.
pub fn decay_importance(importance: f32, factor: f32, config: &ConsolidationConfig) -> f32 {
    let floor = if importance >= config.core_floor {
        config.core_floor
    } else {
        config.importance_floor
    };
    (importance * factor).max(floor).min(importance)
}

impl MemoryManager {
    /// Run one consolidation pass to completion.
    pub async fn consolidate(&self) -> Result<ConsolidationReport, MemoryError> {
        self.consolidate_with(&CancellationToken::new()).await
    }

    /// Run one consolidation pass, stopping between pairs if `cancel`
    /// fires. Work already applied stays applied and is reported through
    /// [`MemoryError::ConsolidationAborted`].
    ///
    /// Sweeps repeat until one completes without a merge, so running the
    /// pass again right away merges nothing.
    pub async fn consolidate_with(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ConsolidationReport, MemoryError> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        let mut report = ConsolidationReport::default();
        info!(namespace = %self.namespace, entries = state.entries.len(), "Consolidation started");

        loop {
            report.sweeps += 1;
            let merged_before = report.merged;
            self.sweep(&mut state, cancel, &mut report).await?;
            if report.merged == merged_before {
                break;
            }
        }

        self.decay_stale(&mut state, now, cancel, &mut report).await?;

        let checkpoint = ConsolidationCheckpoint {
            completed_at: now,
            report: report.clone(),
            entries: state.sorted_entries(),
        };
        self.store
            .record_checkpoint(&self.namespace, &checkpoint)
            .await
            .map_err(MemoryError::storage)?;

        info!(
            namespace = %self.namespace,
            pairs = report.pairs_examined,
            links = report.links_created,
            merged = report.merged,
            skipped = report.merges_skipped,
            decayed = report.decayed,
            archived = report.archived,
            sweeps = report.sweeps,
            "Consolidation complete"
        );
        Ok(report)
    }

    fn aborted(report: &ConsolidationReport) -> MemoryError {
        MemoryError::ConsolidationAborted {
            merges_applied: report.merged,
            links_created: report.links_created,
        }
    }

    async fn sweep(
        &self,
        state: &mut NamespaceMemory,
        cancel: &CancellationToken,
        report: &mut ConsolidationReport,
    ) -> Result<(), MemoryError> {
        let ids = state.live_ids_by_age();

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                if cancel.is_cancelled() {
                    warn!(namespace = %self.namespace, "Consolidation cancelled");
                    return Err(Self::aborted(report));
                }
                let (a, b) = (ids[i], ids[j]);
                let (Some(ea), Some(eb)) = (state.entries.get(&a), state.entries.get(&b)) else {
                    continue;
                };
                if !ea.is_live() || !eb.is_live() || ea.kind != eb.kind {
                    continue;
                }
                let Some(similarity) = state.index.similarity(&a, &b) else {
                    continue;
                };
                report.pairs_examined += 1;

                if similarity >= self.consolidation_config.duplicate_threshold {
                    self.merge_pair(state, a, b, report).await?;
                } else if similarity >= self.consolidation_config.link_threshold
                    && !ea.links.contains(&b)
                {
                    self.link_pair(state, a, b).await?;
                    report.links_created += 1;
                }
            }
        }
        Ok(())
    }

    async fn link_pair(
        &self,
        state: &mut NamespaceMemory,
        a: Uuid,
        b: Uuid,
    ) -> Result<(), MemoryError> {
        let (Some(ea), Some(eb)) = (state.entries.get(&a), state.entries.get(&b)) else {
            return Ok(());
        };
        let mut ea = ea.clone();
        let mut eb = eb.clone();
        ea.links.insert(b);
        eb.links.insert(a);

        self.store
            .save_entries(&self.namespace, &[ea.clone(), eb.clone()])
            .await
            .map_err(MemoryError::storage)?;
        state.entries.insert(a, ea);
        state.entries.insert(b, eb);
        debug!(namespace = %self.namespace, %a, %b, "Linked");
        Ok(())
    }

    /// Merge the duplicate pair. Returns `false` if the merge was skipped
    /// because the merged content could not be embedded.
    async fn merge_pair(
        &self,
        state: &mut NamespaceMemory,
        a: Uuid,
        b: Uuid,
        report: &mut ConsolidationReport,
    ) -> Result<bool, MemoryError> {
        let (Some(ea), Some(eb)) = (state.entries.get(&a), state.entries.get(&b)) else {
            return Ok(false);
        };
        let (survivor, absorbed) = pick_survivor(ea, eb);
        let (mut merged, archived) =
            merge_entries(survivor, absorbed, self.consolidation_config.max_merged_chars);

        if merged.content != survivor.content {
            match self.embed(&merged.content).await {
                Ok(embedding) => merged.embedding = embedding,
                Err(err) => {
                    warn!(
                        namespace = %self.namespace,
                        survivor = %merged.id,
                        "Merge skipped, re-embedding failed: {}",
                        err
                    );
                    report.merges_skipped += 1;
                    return Ok(false);
                }
            }
        }

        // Neighbours of the absorbed entry now point at the survivor.
        let mut batch = vec![merged.clone(), archived.clone()];
        for neighbor_id in &merged.links {
            let Some(neighbor) = state.entries.get(neighbor_id) else {
                continue;
            };
            if neighbor.links.contains(&archived.id) || !neighbor.links.contains(&merged.id) {
                let mut neighbor = neighbor.clone();
                neighbor.links.remove(&archived.id);
                neighbor.links.insert(merged.id);
                batch.push(neighbor);
            }
        }

        self.store
            .save_entries(&self.namespace, &batch)
            .await
            .map_err(MemoryError::storage)?;

        let (survivor_id, absorbed_id) = (merged.id, archived.id);
        for entry in batch {
            state.upsert(entry)?;
        }
        report.merged += 1;
        debug!(namespace = %self.namespace, survivor = %survivor_id, absorbed = %absorbed_id, "Merged duplicate");
        Ok(true)
    }

    async fn decay_stale(
        &self,
        state: &mut NamespaceMemory,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut ConsolidationReport,
    ) -> Result<(), MemoryError> {
        let window = self.consolidation_config.decay_window();
        for id in state.live_ids_by_age() {
            if cancel.is_cancelled() {
                warn!(namespace = %self.namespace, "Consolidation cancelled during decay");
                return Err(Self::aborted(report));
            }
            let Some(entry) = state.entries.get(&id) else {
                continue;
            };
            if now - entry.last_accessed_at < window {
                continue;
            }

            let factor = self.consolidation_config.decay_factor.get(entry.kind);
            let importance = decay_importance(entry.importance, factor, &self.consolidation_config);
            let archive = importance < self.consolidation_config.archive_threshold;
            let changed = importance != entry.importance;
            if !changed && !archive {
                continue;
            }

            let mut updated = entry.clone();
            updated.importance = importance;
            updated.archived = archive;
            self.store
                .save_entries(&self.namespace, std::slice::from_ref(&updated))
                .await
                .map_err(MemoryError::storage)?;
            state.entries.insert(id, updated);

            if changed {
                report.decayed += 1;
            }
            if archive {
                report.archived += 1;
            }
        }
        Ok(())
    }
}
