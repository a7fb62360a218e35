//! Deterministic embedders for tests and demos.

use crate::embedding::{fnv1a, normalize, Embedder};
use crate::heuristics::is_stopword;
use anyhow::Result;
use async_trait::async_trait;
use kindred_core::Embedding;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const CONCEPTS: &[(&[&str], usize)] = &[
    (
        &[
            "hiking", "hike", "hikes", "outdoor", "outdoors", "activities", "walk", "walks",
            "walking", "trail", "trails", "camping", "mountains",
        ],
        0,
    ),
    (&["weather", "rain", "rainy", "sunny", "forecast"], 1),
    (&["sad", "exam", "exams", "upset", "stressed"], 2),
    (&["dog", "dogs", "puppy"], 3),
    (&["max"], 4),
    (&["named", "called", "name"], 5),
    (&["likes", "like", "enjoy", "enjoys", "love", "loves"], 6),
];

/// First bucket used for words outside the concept lexicon.
const FREE_BUCKETS_START: usize = 10;

/// Maps a small hand-written lexicon of synonyms onto shared axes, so
/// "outdoor activities" lands near "hiking" without a real model.
/// Unknown words hash into the remaining buckets.
pub struct LexiconEmbedder {
    dimension: usize,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl LexiconEmbedder {
    pub const DIMENSION: usize = 64;

    pub fn new() -> Self {
        Self {
            dimension: Self::DIMENSION,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// While failing, every call returns an error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut v = vec![0.0f32; self.dimension];
        let free = self.dimension - FREE_BUCKETS_START;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|w| !w.is_empty() && !is_stopword(w))
        {
            let bucket = CONCEPTS
                .iter()
                .find(|(words, _)| words.contains(&word.as_str()))
                .map(|(_, axis)| *axis)
                .unwrap_or_else(|| {
                    FREE_BUCKETS_START + (fnv1a(word.as_bytes()) % free as u64) as usize
                });
            v[bucket] += 1.0;
        }
        normalize(&mut v);
        v
    }
}

impl Default for LexiconEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for LexiconEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "lexicon"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("lexicon embedder switched to failing");
        }
        Ok(self.embed_sync(text))
    }
}

/// Answers only after `delay`; pairs with a shorter call timeout to
/// simulate an unresponsive provider.
pub struct StalledEmbedder {
    dimension: usize,
    delay: Duration,
}

impl StalledEmbedder {
    pub fn new(dimension: usize, delay: Duration) -> Self {
        Self { dimension, delay }
    }
}

#[async_trait]
impl Embedder for StalledEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "stalled"
    }

    async fn embed(&self, _text: &str) -> Result<Embedding> {
        tokio::time::sleep(self.delay).await;
        let mut v = vec![0.0; self.dimension];
        if let Some(first) = v.first_mut() {
            *first = 1.0;
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_synonyms_share_an_axis() {
        let e = LexiconEmbedder::new();
        let hiking = e.embed_sync("User likes hiking");
        let query = e.embed_sync("outdoor activities");
        let weather = e.embed_sync("User asked about the weather");
        assert!(cosine_similarity(&hiking, &query) > 0.7);
        assert!(cosine_similarity(&weather, &query) < 0.01);
    }

    #[test]
    fn test_paraphrases_are_identical() {
        let e = LexiconEmbedder::new();
        let a = e.embed_sync("User has a dog named Max");
        let b = e.embed_sync("User's dog is called Max");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }
}
