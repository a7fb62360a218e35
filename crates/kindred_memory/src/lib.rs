pub mod consolidation;
pub mod embedding;
pub mod heuristics;
pub mod index;
pub mod manager;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod scoring;
pub mod sqlite;
pub mod store;

pub use embedding::{build_embedder, cosine_similarity, Embedder, HashEmbedder, OllamaEmbedder};
#[cfg(feature = "fastembed")]
pub use embedding::FastEmbedder;
pub use heuristics::{extract_preferences, is_memorable, Preference, Polarity};
pub use index::{Neighbor, VectorIndex};
pub use manager::{MemoryManager, TurnMemory};
pub use sqlite::SqliteStore;
pub use store::InMemoryStore;
