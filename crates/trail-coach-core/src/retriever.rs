//! Exhaustive max-over-phrasings retrieval.
//!
//! Each knowledge entry scores as well as its single best phrasing: the
//! cosine similarity between the query and every phrasing vector is
//! computed and the maximum kept. Entries are then sorted by score,
//! descending, with a stable sort so exact ties keep knowledge-base order,
//! and truncated to `k`.

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::index::KnowledgeIndex;
use crate::models::ScoredMatch;

/// Score every entry in `index` against `query` and return the best `k`.
pub fn top_k<'a>(index: &'a KnowledgeIndex, query: &[f32], k: usize) -> Vec<ScoredMatch<'a>> {
    if k == 0 {
        return Vec::new();
    }
    debug_assert!(
        index.is_empty() || query.len() == index.dims(),
        "query has {} dimensions, index has {}",
        query.len(),
        index.dims()
    );

    let mut scored: Vec<ScoredMatch<'a>> = index
        .iter()
        .map(|(entry, indexed)| {
            let score = indexed
                .embeddings
                .iter()
                .map(|v| cosine_similarity(query, v))
                .fold(-1.0f32, f32::max);
            ScoredMatch { entry, score }
        })
        .collect();

    // `sort_by` is stable: equal scores stay in knowledge-base order.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}

impl KnowledgeIndex {
    /// Convenience wrapper around [`top_k`].
    pub fn query(&self, query: &[f32], k: usize) -> Vec<ScoredMatch<'_>> {
        top_k(self, query, k)
    }
}
