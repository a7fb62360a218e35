//! # kindred core
//!
//! Shared vocabulary of the memory and personality subsystem:
//!
//! - [`MemoryEntry`] and its closed [`MemoryKind`] tag
//! - [`PersonalityState`] (Big Five traits + PAD mood)
//! - the error taxonomy surfaced to the conversation engine
//! - configuration, clocks and the persistence traits implemented by the
//!   storage adapters

pub mod clock;
pub mod config;
pub mod error;
pub mod memory;
pub mod personality;
pub mod sentiment;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConsolidationConfig, EmbeddingConfig, EmbeddingProviderKind, ImportanceWeights, KindredConfig,
    MemoryConfig, PerKind, PersonalityConfig, RecallWeights, StorageConfig,
};
pub use error::{Degradation, MemoryError, PersonalityError};
pub use memory::{
    ConsolidationReport, Embedding, MemoryEntry, MemoryFilters, MemoryKind, MemoryStats,
    RecallHit, RecallOutcome,
};
pub use personality::{Mood, MoodSnapshot, PersonalityState, TraitName, Traits, TurnSignal};
pub use sentiment::analyze_turn;
pub use store::{ConsolidationCheckpoint, MemoryStore, PersonalityStore};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Isolation boundary for one user's (or session's) memory and personality.
///
/// Nothing is shared across namespaces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
