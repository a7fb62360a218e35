//! Error taxonomy of the memory and personality core.
//!
//! | error                | severity                   | who retries        |
//! |----------------------|----------------------------|--------------------|
//! | `Storage`            | fatal for the operation    | caller, w/ backoff |
//! | `EmbeddingTimeout`   | degrade, non-fatal         | caller             |
//! | `ConsolidationAborted` | operator cancel, resumable | scheduler        |
//! | `InvariantViolation` | programming error          | nobody             |

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory store unavailable: {0}")]
    Storage(String),

    #[error("embedding provider timed out after {0:?}")]
    EmbeddingTimeout(Duration),

    #[error("embedding provider failed: {0}")]
    Embedding(String),

    #[error(
        "consolidation aborted by operator after {merges_applied} merges and {links_created} new links"
    )]
    ConsolidationAborted {
        merges_applied: usize,
        links_created: usize,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl MemoryError {
    /// Wrap a storage adapter failure, keeping the whole context chain.
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    pub fn embedding(err: anyhow::Error) -> Self {
        Self::Embedding(format!("{err:#}"))
    }

    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::EmbeddingTimeout(_) | Self::Embedding(_)
        )
    }

    /// The non-fatal form of this error, if it has one.
    pub fn degradation(&self) -> Option<Degradation> {
        match self {
            Self::Storage(reason) => Some(Degradation::StoreUnavailable {
                reason: reason.clone(),
            }),
            Self::EmbeddingTimeout(after) => Some(Degradation::EmbeddingTimeout {
                after_ms: after.as_millis() as u64,
            }),
            Self::Embedding(reason) => Some(Degradation::EmbeddingUnavailable {
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// A reported, non-fatal loss of context quality.
///
/// Recall returns an empty result together with one of these instead of
/// failing the conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    EmbeddingTimeout { after_ms: u64 },
    EmbeddingUnavailable { reason: String },
    StoreUnavailable { reason: String },
}

impl Degradation {
    pub fn describe(&self) -> String {
        match self {
            Self::EmbeddingTimeout { after_ms } => {
                format!("embedding provider timed out after {}ms", after_ms)
            }
            Self::EmbeddingUnavailable { reason } => {
                format!("embedding provider unavailable: {}", reason)
            }
            Self::StoreUnavailable { reason } => format!("memory store unavailable: {}", reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum PersonalityError {
    #[error("personality state unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MemoryError::Storage("down".into()).is_retryable());
        assert!(MemoryError::EmbeddingTimeout(Duration::from_millis(10)).is_retryable());
        assert!(!MemoryError::InvariantViolation("importance 1.3".into()).is_retryable());
        assert!(!MemoryError::InvalidInput("k = 0".into()).is_retryable());
    }

    #[test]
    fn test_degradation_mapping() {
        let err = MemoryError::EmbeddingTimeout(Duration::from_millis(250));
        assert_eq!(
            err.degradation(),
            Some(Degradation::EmbeddingTimeout { after_ms: 250 })
        );
        assert!(MemoryError::ConsolidationAborted {
            merges_applied: 1,
            links_created: 0
        }
        .degradation()
        .is_none());
    }

    #[test]
    fn test_storage_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk I/O error");
        let err = MemoryError::storage(inner.context("Failed to insert memory entry"));
        let msg = err.to_string();
        assert!(msg.contains("Failed to insert memory entry"));
        assert!(msg.contains("disk I/O error"));
    }
}
