//! Text embedding providers.
//!
//! Every provider produces vectors of one fixed dimension. Callers bound
//! each call with a timeout; providers themselves never retry.

use crate::heuristics::content_words;
use anyhow::{Context, Result};
use async_trait::async_trait;
use kindred_core::{Embedding, EmbeddingConfig, EmbeddingProviderKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Build the configured provider.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        EmbeddingProviderKind::Hash => Arc::new(HashEmbedder::new(config.dimension)),
        EmbeddingProviderKind::Ollama => Arc::new(OllamaEmbedder::new(
            &config.base_url,
            &config.model,
            config.dimension,
            config.timeout(),
        )?),
        #[cfg(feature = "fastembed")]
        EmbeddingProviderKind::Fastembed => Arc::new(FastEmbedder::new()?),
        #[cfg(not(feature = "fastembed"))]
        EmbeddingProviderKind::Fastembed => {
            anyhow::bail!("embedding provider 'fastembed' requires building with --features fastembed")
        }
    };
    tracing::info!(
        provider = embedder.name(),
        dimension = embedder.dimension(),
        "Embedding provider ready"
    );
    Ok(embedder)
}

/// Calculate cosine similarity between two vectors
/// Returns a value between -1.0 and 1.0 (1.0 = identical direction)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Scale `v` to unit length in place. Zero vectors stay zero.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

// ============================================================================
// Hashing embedder
// ============================================================================

/// Offline feature-hashing embedder.
///
/// Each content word and each adjacent word pair is hashed to a signed
/// bucket. Texts that share vocabulary land close together; nothing else
/// about meaning is captured. Deterministic across runs and platforms.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut v = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = content_words(text).collect();

        let mut add = |feature: &str, weight: f32| {
            let h = fnv1a(feature.as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign * weight;
        };

        for token in &tokens {
            add(token, 1.0);
        }
        for pair in tokens.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_sync(text))
    }
}

// ============================================================================
// Ollama
// ============================================================================

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

/// Embeddings from a local Ollama server (`POST /api/embeddings`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, dimension: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OllamaRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .context("Failed to reach Ollama")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {}: {}", status, body);
        }

        let body: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama embedding response")?;

        if body.embedding.len() != self.dimension {
            anyhow::bail!(
                "model {} returned {} dimensions, configured for {}",
                self.model,
                body.embedding.len(),
                self.dimension
            );
        }
        Ok(body.embedding)
    }
}

// ============================================================================
// fastembed (local ONNX model)
// ============================================================================

#[cfg(feature = "fastembed")]
pub use local::FastEmbedder;

#[cfg(feature = "fastembed")]
mod local {
    use super::Embedder;
    use anyhow::Result;
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
    use kindred_core::Embedding;
    use std::sync::Arc;

    /// multilingual-e5-small via fastembed. Downloads the model on first use.
    #[derive(Clone)]
    pub struct FastEmbedder {
        model: Arc<TextEmbedding>,
    }

    impl FastEmbedder {
        pub const DIMENSION: usize = 384;

        pub fn new() -> Result<Self> {
            let mut options = InitOptions::default();
            options.model_name = FastEmbedModel::MultilingualE5Small;
            options.show_download_progress = true;

            let model = TextEmbedding::try_new(options)?;
            Ok(Self {
                model: Arc::new(model),
            })
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        fn dimension(&self) -> usize {
            Self::DIMENSION
        }

        fn name(&self) -> &str {
            "fastembed"
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            let model = self.model.clone();
            let text = text.to_string();
            // Inference is CPU-bound.
            let embeddings =
                tokio::task::spawn_blocking(move || model.embed(vec![text], None)).await??;
            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("Failed to generate embedding"))
        }
    }
}
