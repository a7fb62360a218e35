//! Brute-force cosine index over one namespace's embeddings.
//!
//! Vectors are normalized on insert so similarity is a dot product.

use crate::embedding::normalize;
use kindred_core::{Embedding, MemoryError};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: Uuid,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    vectors: HashMap<Uuid, Embedding>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Insert or replace the vector for `id`.
    pub fn insert(&mut self, id: Uuid, embedding: &[f32]) -> Result<(), MemoryError> {
        if embedding.len() != self.dimension {
            return Err(MemoryError::InvariantViolation(format!(
                "index expects {} dimensions, got {} for {}",
                self.dimension,
                embedding.len(),
                id
            )));
        }
        let mut v = embedding.to_vec();
        normalize(&mut v);
        self.vectors.insert(id, v);
        Ok(())
    }

    pub fn remove(&mut self, id: &Uuid) {
        self.vectors.remove(id);
    }

    pub fn similarity(&self, a: &Uuid, b: &Uuid) -> Option<f32> {
        let va = self.vectors.get(a)?;
        let vb = self.vectors.get(b)?;
        Some(dot(va, vb))
    }

    /// Up to `limit` accepted neighbours of `query`, most similar first.
    pub fn nearest<F>(&self, query: &[f32], limit: usize, mut accept: F) -> Vec<Neighbor>
    where
        F: FnMut(&Uuid, f32) -> bool,
    {
        if limit == 0 || query.len() != self.dimension {
            return Vec::new();
        }
        let mut q = query.to_vec();
        normalize(&mut q);

        let mut hits: Vec<Neighbor> = self
            .vectors
            .iter()
            .map(|(id, v)| Neighbor {
                id: *id,
                similarity: dot(&q, v),
            })
            .filter(|n| accept(&n.id, n.similarity))
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        hits
    }

    /// Highest similarity between `query` and any accepted vector.
    pub fn max_similarity<F>(&self, query: &[f32], accept: F) -> Option<f32>
    where
        F: FnMut(&Uuid, f32) -> bool,
    {
        self.nearest(query, 1, accept).first().map(|n| n.similarity)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| x * y)
        .sum::<f32>()
        .clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_orders_by_similarity() {
        let mut index = VectorIndex::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        index.insert(a, &[1.0, 0.0]).unwrap();
        index.insert(b, &[1.0, 1.0]).unwrap();
        index.insert(c, &[0.0, 3.0]).unwrap();

        let hits = index.nearest(&[2.0, 0.0], 3, |_, _| true);
        let ids: Vec<Uuid> = hits.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(hits[2].similarity.abs() < 1e-6);
    }

    #[test]
    fn test_nearest_applies_filter_and_limit() {
        let mut index = VectorIndex::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.insert(a, &[1.0, 0.0]).unwrap();
        index.insert(b, &[0.0, 1.0]).unwrap();

        let hits = index.nearest(&[1.0, 0.0], 5, |_, sim| sim >= 0.5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a);

        assert_eq!(index.nearest(&[1.0, 0.0], 0, |_, _| true).len(), 0);
    }

    #[test]
    fn test_insert_rejects_wrong_dimension() {
        let mut index = VectorIndex::new(3);
        let err = index.insert(Uuid::new_v4(), &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, MemoryError::InvariantViolation(_)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_replace_and_remove() {
        let mut index = VectorIndex::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.insert(a, &[1.0, 0.0]).unwrap();
        index.insert(b, &[0.0, 1.0]).unwrap();
        assert!(index.similarity(&a, &b).unwrap().abs() < 1e-6);

        index.insert(b, &[1.0, 0.0]).unwrap();
        assert!((index.similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);

        index.remove(&b);
        assert_eq!(index.len(), 1);
        assert!(index.similarity(&a, &b).is_none());
        assert_eq!(index.max_similarity(&[0.0, 1.0], |_, _| true), Some(0.0));
    }
}
