//! Deterministic mock enrichment provider.
//!
//! Used in tests and for offline operation: outputs are derived purely from
//! a hash of the input, so the same title/content/query always produces the
//! same keywords, description and embedding without any network call.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use super::{Enrichment, EnrichmentClient, Result};

/// Deterministic, hash-derived enrichment provider.
pub struct MockProvider {
    dimension: usize,
}

impl MockProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

fn hash_of(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Most frequent whitespace-delimited tokens of at least 4 characters,
/// longest-match-first among ties. Used both by the mock provider and by
/// [`super::synthesize_placeholder`] for the live provider's final retry
/// failure.
pub fn top_tokens(text: &str, n: usize) -> Vec<String> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for tok in text.split_whitespace() {
        let cleaned: String = tok
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if cleaned.len() >= 4 {
            *counts.entry(cleaned).or_insert(0) += 1;
        }
    }
    let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pairs.into_iter().take(n).map(|(tok, _)| tok).collect()
}

#[async_trait]
impl EnrichmentClient for MockProvider {
    async fn enrich(&self, title: &str, content: &str) -> Result<Enrichment> {
        let keywords = top_tokens(content, 5).join(", ");
        let description = if title.is_empty() {
            top_tokens(content, 12).join(" ")
        } else {
            format!("{title} — a page about {}", top_tokens(content, 3).join(", "))
        };
        Ok(Enrichment { keywords, description })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let seed = hash_of(text);
        let mut state = seed;
        let v = (0..self.dimension)
            .map(|_| {
                // xorshift64*, deterministic and cheap
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ((state as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32
            })
            .collect();
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health_check(&self) -> bool {
        true
    }
}
