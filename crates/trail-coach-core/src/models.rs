//! Core data models for the retrieval engine.
//!
//! These types represent the knowledge entries supplied by the caller,
//! the derived per-phrasing embeddings held by the index, and the
//! per-query scored matches.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CoachError, Result};

/// One unit of answerable domain knowledge.
///
/// Field aliases accept the row shape of the content table the knowledge
/// base is exported from (`categoria`, `domande`, `risposta`, `fonte`,
/// `ordine`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Stable unique identifier.
    pub id: i64,
    /// Display grouping; not used in scoring.
    #[serde(default, alias = "categoria")]
    pub category: String,
    /// Every way a user might phrase the question this entry answers.
    #[serde(alias = "domande")]
    pub phrasings: Vec<String>,
    /// Returned verbatim when this entry wins.
    #[serde(alias = "risposta")]
    pub answer: String,
    /// Attribution surfaced to the user.
    #[serde(default, alias = "fonte")]
    pub source: String,
    /// Default display ordering of the raw knowledge base.
    #[serde(default, alias = "ordine")]
    pub rank_hint: i64,
}

/// Embeddings for one knowledge entry, 1:1 with its phrasings.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEntry {
    pub id: i64,
    pub embeddings: Vec<Vec<f32>>,
}

/// A knowledge entry scored against one query.
#[derive(Debug, Clone, Copy)]
pub struct ScoredMatch<'a> {
    pub entry: &'a KnowledgeEntry,
    /// Cosine similarity of the best-matching phrasing.
    pub score: f32,
}

/// Check the knowledge-base invariants: unique ids, non-empty phrasings.
pub fn validate_knowledge_base(entries: &[KnowledgeEntry]) -> Result<()> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id) {
            return Err(CoachError::InvalidKnowledgeBase(format!(
                "duplicate entry id {}",
                entry.id
            )));
        }
        if entry.phrasings.is_empty() {
            return Err(CoachError::InvalidKnowledgeBase(format!(
                "entry {} has no phrasings",
                entry.id
            )));
        }
    }
    Ok(())
}

/// Total number of phrasings across the knowledge base.
pub fn total_phrasings(entries: &[KnowledgeEntry]) -> usize {
    entries.iter().map(|e| e.phrasings.len()).sum()
}

/// Knowledge-base entries in display order (`rank_hint`, then `id`).
pub fn display_order(entries: &[KnowledgeEntry]) -> Vec<&KnowledgeEntry> {
    let mut sorted: Vec<&KnowledgeEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| (e.rank_hint, e.id));
    sorted
}
