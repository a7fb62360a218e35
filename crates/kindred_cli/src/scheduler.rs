//! Periodic consolidation: the external scheduler the memory core expects.

use kindred_context::NamespaceRegistry;
use kindred_core::MemoryError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Consolidate every open namespace each `interval` until `cancel` fires.
/// A pass in flight when `cancel` fires is aborted between entry pairs.
pub fn spawn_consolidation(
    registry: Arc<NamespaceRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; nothing is worth merging yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Consolidation scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    for (namespace, result) in registry.consolidate_all(&cancel).await {
                        if let Err(MemoryError::ConsolidationAborted { merges_applied, .. }) = result {
                            tracing::info!(
                                namespace = %namespace,
                                merges_applied,
                                "Scheduled consolidation interrupted by shutdown"
                            );
                        }
                    }
                }
            }
        }
    })
}
