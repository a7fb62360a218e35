use crate::memory::MemoryKind;
use crate::personality::Traits;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KindredConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub memory: MemoryConfig,
    pub consolidation: ConsolidationConfig,
    pub personality: PersonalityConfig,
}

impl KindredConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied and the result is validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: KindredConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Try to load from path; if the file is missing or invalid, return
    /// defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({:#}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KINDRED_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Ok(v) = std::env::var("KINDRED_EMBEDDING_PROVIDER") {
            match v.as_str() {
                "hash" => self.embedding.provider = EmbeddingProviderKind::Hash,
                "ollama" => self.embedding.provider = EmbeddingProviderKind::Ollama,
                "fastembed" => self.embedding.provider = EmbeddingProviderKind::Fastembed,
                other => tracing::warn!("Unknown KINDRED_EMBEDDING_PROVIDER '{}', ignored", other),
            }
        }
        if let Ok(v) = std::env::var("KINDRED_OLLAMA_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("KINDRED_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("KINDRED_EMBEDDING_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.embedding.timeout_ms = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            anyhow::bail!("embedding.dimension must be positive");
        }
        self.memory.validate()?;
        self.consolidation.validate()?;
        self.personality.validate()?;
        Ok(())
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

/// One value per memory kind, for kind-specific weighting and decay tables.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PerKind<T> {
    pub episodic: T,
    pub semantic: T,
    pub emotional: T,
}

impl<T: Copy> PerKind<T> {
    pub fn get(&self, kind: MemoryKind) -> T {
        match kind {
            MemoryKind::Episodic => self.episodic,
            MemoryKind::Semantic => self.semantic,
            MemoryKind::Emotional => self.emotional,
        }
    }

    pub fn values(&self) -> [T; 3] {
        [self.episodic, self.semantic, self.emotional]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "kindred.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    /// Offline feature-hashing embedder. No model, no network.
    #[default]
    Hash,
    /// Local model server (`/api/embeddings`).
    Ollama,
    /// In-process ONNX model (requires the `fastembed` feature).
    Fastembed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub base_url: String,
    /// Fixed system-wide. Every stored embedding must have this length.
    pub dimension: usize,
    /// Caller-side bound on a single embedding call.
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hash,
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimension: 384,
            timeout_ms: 2_000,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// score = similarity·α + importance·β + recency·γ
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecallWeights {
    pub similarity: f32,
    pub importance: f32,
    pub recency: f32,
}

impl Default for RecallWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            importance: 0.25,
            recency: 0.15,
        }
    }
}

/// importance = sentiment·|s| + novelty·n + kind_weight[kind], clamped to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImportanceWeights {
    pub sentiment: f32,
    pub novelty: f32,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            sentiment: 0.35,
            novelty: 0.35,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub recall_weights: RecallWeights,
    /// Candidates below this cosine similarity are never returned.
    pub similarity_floor: f32,
    /// Half-life of the recency term, in hours.
    pub recency_half_life_hours: f64,
    /// Nearest neighbours fetched before re-ranking (at least `k`).
    pub candidate_pool: usize,
    pub default_k: usize,
    pub importance_weights: ImportanceWeights,
    pub kind_weight: PerKind<f32>,
    /// |sentiment| at or above which an ingested turn is stored as emotional.
    pub emotional_threshold: f32,
    /// Minimum number of content words for a turn to be worth remembering.
    pub min_content_words: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_weights: RecallWeights::default(),
            similarity_floor: 0.2,
            recency_half_life_hours: 72.0,
            candidate_pool: 32,
            default_k: 5,
            importance_weights: ImportanceWeights::default(),
            kind_weight: PerKind {
                episodic: 0.1,
                semantic: 0.25,
                emotional: 0.3,
            },
            emotional_threshold: 0.6,
            min_content_words: 3,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<()> {
        let w = &self.recall_weights;
        if [w.similarity, w.importance, w.recency]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            anyhow::bail!("memory.recall_weights must be finite and non-negative");
        }
        if !(-1.0..=1.0).contains(&self.similarity_floor) {
            anyhow::bail!("memory.similarity_floor must be within [-1, 1]");
        }
        if self.recency_half_life_hours <= 0.0 {
            anyhow::bail!("memory.recency_half_life_hours must be positive");
        }
        if self
            .kind_weight
            .values()
            .iter()
            .chain([self.importance_weights.sentiment, self.importance_weights.novelty].iter())
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            anyhow::bail!("memory importance weights must be finite and non-negative");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Same-kind pairs at or above this similarity get linked.
    pub link_threshold: f32,
    /// Same-kind pairs at or above this similarity get merged.
    pub duplicate_threshold: f32,
    /// Cap on merged content, in characters.
    pub max_merged_chars: usize,
    /// Entries not accessed for this long decay on every pass.
    pub decay_window_hours: i64,
    /// Multiplier applied to stale importance, per kind.
    pub decay_factor: PerKind<f32>,
    /// Entries at or above this importance never decay below it.
    pub core_floor: f32,
    /// Lowest importance any entry can decay to.
    pub importance_floor: f32,
    /// Stale entries that decay below this are archived.
    pub archive_threshold: f32,
    /// Period used by the external scheduler.
    pub interval_secs: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            link_threshold: 0.75,
            duplicate_threshold: 0.92,
            max_merged_chars: 1_000,
            decay_window_hours: 24 * 7,
            decay_factor: PerKind {
                episodic: 0.90,
                semantic: 0.97,
                emotional: 0.95,
            },
            core_floor: 0.75,
            importance_floor: 0.02,
            archive_threshold: 0.08,
            interval_secs: 3_600,
        }
    }
}

impl ConsolidationConfig {
    pub fn decay_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.decay_window_hours)
    }

    pub fn validate(&self) -> Result<()> {
        if self.duplicate_threshold < self.link_threshold {
            anyhow::bail!("consolidation.duplicate_threshold must not be below link_threshold");
        }
        if self.duplicate_threshold > 1.0 {
            anyhow::bail!("consolidation.duplicate_threshold must be at most 1.0");
        }
        if self
            .decay_factor
            .values()
            .iter()
            .any(|f| !(0.0..=1.0).contains(f))
        {
            anyhow::bail!("consolidation.decay_factor values must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.importance_floor)
            || !(0.0..=1.0).contains(&self.core_floor)
            || self.importance_floor > self.core_floor
        {
            anyhow::bail!("consolidation floors must satisfy 0 <= importance_floor <= core_floor <= 1");
        }
        if !(0.0..=1.0).contains(&self.archive_threshold) {
            anyhow::bail!("consolidation.archive_threshold must be within [0, 1]");
        }
        if self.decay_window_hours < 0 {
            anyhow::bail!("consolidation.decay_window_hours must not be negative");
        }
        if self.max_merged_chars == 0 {
            anyhow::bail!("consolidation.max_merged_chars must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersonalityConfig {
    /// Scales a signal component into a trait delta.
    pub learning_rate: f32,
    /// Hard bound on any single trait change per turn.
    pub max_delta: f32,
    /// Weight of the instantaneous signal when blending mood.
    pub mood_smoothing: f32,
    /// Mood starts drifting to baseline after this much silence.
    pub idle_window_secs: u64,
    /// Fraction-of-gap exponent per idle window: 1 - exp(-rate).
    pub decay_rate: f32,
    /// Mood snapshots kept for trend display.
    pub history_len: usize,
    pub initial_traits: Traits,
}

impl Default for PersonalityConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.02,
            max_delta: 0.01,
            mood_smoothing: 0.3,
            idle_window_secs: 600,
            decay_rate: 0.5,
            history_len: 64,
            initial_traits: Traits::default(),
        }
    }
}

impl PersonalityConfig {
    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_window_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate >= 0.0) {
            anyhow::bail!("personality.learning_rate must be finite and non-negative");
        }
        if !(self.max_delta.is_finite() && self.max_delta >= 0.0 && self.max_delta <= 1.0) {
            anyhow::bail!("personality.max_delta must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.mood_smoothing) {
            anyhow::bail!("personality.mood_smoothing must be within [0, 1]");
        }
        if !(self.decay_rate.is_finite() && self.decay_rate > 0.0) {
            anyhow::bail!("personality.decay_rate must be positive");
        }
        if !self.initial_traits.in_bounds() {
            anyhow::bail!("personality.initial_traits must all be within [0, 1]");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
