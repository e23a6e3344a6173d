//! In-memory dense-vector similarity index (C2).
//!
//! The teacher crate backs this with `usearch`'s approximate HNSW index.
//! This engine's contract instead requires bit-exact, deterministic
//! behavior — stable higher-id-first tie-breaks and a specific evicted id
//! on overflow — so this is a flat exact-cosine index instead. Vectors are
//! L2-normalized on insert so cosine reduces to a dot product; the scan
//! itself is parallelized with `rayon`, the crate the rest of the example
//! pack reaches for in exactly this kind of fan-out.

use std::collections::HashMap;

use crate::page::PageId;
use rayon::prelude::*;

#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum VectorError {
    DimensionMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for VectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorError::DimensionMismatch { expected, actual } => write!(
                f,
                "dimension mismatch: expected {expected}, got {actual}"
            ),
        }
    }
}

impl std::error::Error for VectorError {}

/// Soft cap default before the safety-net eviction kicks in.
pub const DEFAULT_SOFT_CAP: usize = 10_000;

/// Exact-cosine, integer-keyed vector index.
pub struct VectorIndex {
    dimension: usize,
    soft_cap: usize,
    vectors: HashMap<PageId, Vec<f32>>,
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self::with_soft_cap(dimension, DEFAULT_SOFT_CAP)
    }

    pub fn with_soft_cap(dimension: usize, soft_cap: usize) -> Self {
        Self {
            dimension,
            soft_cap,
            vectors: HashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn size(&self) -> usize {
        self.vectors.len()
    }

    fn check_dimension(&self, v: &[f32]) -> Result<(), VectorError> {
        if v.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: v.len(),
            });
        }
        Ok(())
    }

    /// If the soft cap is reached and `incoming_id` isn't already present,
    /// evict the numerically smallest id in the index first, as a safety
    /// net ahead of the capacity/ARC-driven eviction in C5. A no-op for an
    /// id that already has an entry, since that write never grows the index.
    fn evict_if_at_soft_cap(&mut self, incoming_id: PageId) {
        if self.vectors.len() >= self.soft_cap && !self.vectors.contains_key(&incoming_id) {
            if let Some(&smallest) = self.vectors.keys().min() {
                self.vectors.remove(&smallest);
                tracing::warn!(
                    evicted_id = smallest,
                    "vector index soft cap reached, evicted smallest id"
                );
            }
        }
    }

    /// Add a vector for `id`, subject to the soft-cap safety net.
    pub fn add(&mut self, id: PageId, v: Vec<f32>) -> Result<(), VectorError> {
        self.check_dimension(&v)?;
        self.evict_if_at_soft_cap(id);
        self.vectors.insert(id, normalize(v));
        Ok(())
    }

    /// Replace (or insert) the vector for `id`. A first-ever write for `id`
    /// is subject to the same soft-cap safety net as `add`; an update of an
    /// id already present never evicts.
    pub fn replace(&mut self, id: PageId, v: Vec<f32>) -> Result<(), VectorError> {
        self.check_dimension(&v)?;
        self.evict_if_at_soft_cap(id);
        self.vectors.insert(id, normalize(v));
        Ok(())
    }

    /// Remove the vector for `id`. Removing an id that isn't present is
    /// idempotent success, not an error.
    pub fn remove(&mut self, id: PageId) -> bool {
        self.vectors.remove(&id).is_some()
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.vectors.contains_key(&id)
    }

    /// Cosine-similarity search over every stored vector. Ties broken by
    /// higher id first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(PageId, f32)>, VectorError> {
        self.check_dimension(query)?;
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query = normalize(query.to_vec());

        let mut scored: Vec<(PageId, f32)> = self
            .vectors
            .par_iter()
            .map(|(&id, v)| {
                let dot: f32 = v.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (id, dot)
            })
            .collect();

        scored.sort_by(|a, b| match b.1.partial_cmp(&a.1) {
            Some(std::cmp::Ordering::Equal) | None => b.0.cmp(&a.0),
            Some(ord) => ord,
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// `search` followed by the similarity-drop filter. The retrieval
    /// pipeline (C7) applies the same rule again across the fused
    /// lexical+semantic result set, so the two call sites share
    /// [`crate::retrieval::drop_filter`].
    pub fn filtered_search(
        &self,
        query: &[f32],
        k: usize,
        drop_ratio: f32,
        min_absolute: f32,
    ) -> Result<Vec<(PageId, f32)>, VectorError> {
        let results = self.search(query, k)?;
        Ok(crate::retrieval::drop_filter(results, drop_ratio, min_absolute, |&(_, s)| s))
    }
}
