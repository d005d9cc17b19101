//! Persistent index cache abstraction.
//!
//! The [`IndexCache`] trait is a single-key store for "the current index":
//! one [`CacheRecord`] holding every phrasing embedding, tagged with the
//! knowledge-base fingerprint it was computed from. Backends report their
//! failures truthfully; the index builder treats any read failure as a miss
//! and any write failure as a no-op.
//!
//! | Backend | Location | Survives restart |
//! |---------|----------|------------------|
//! | [`memory::InMemoryCache`] | this crate | no |
//! | [`DisabledCache`] | this crate | n/a (always misses) |
//! | `SqliteCache` | `trail-coach` app crate | yes |

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// One cached phrasing embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedVector {
    /// [`phrasing_hash`](crate::fingerprint::phrasing_hash) of the text
    /// this vector was computed from.
    pub hash: String,
    pub embedding: Vec<f32>,
}

/// All cached phrasing embeddings of one knowledge entry, in phrasing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub id: i64,
    pub vectors: Vec<CachedVector>,
}

/// The persisted index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Knowledge-base [`fingerprint`](crate::fingerprint::fingerprint).
    pub version: String,
    /// Model that produced the embeddings.
    pub model: String,
    /// Embedding dimensionality.
    pub dims: usize,
    /// Unix timestamp of the write.
    pub created_at: i64,
    pub entries: Vec<CachedEntry>,
}

impl CacheRecord {
    /// Index the cached entries by knowledge-entry id.
    pub fn into_map(self) -> HashMap<i64, Vec<CachedVector>> {
        self.entries
            .into_iter()
            .map(|e| (e.id, e.vectors))
            .collect()
    }

    /// Whether this record can serve an index for `version` built with
    /// the given model.
    pub fn is_usable_for(&self, version: &str, model: &str, dims: usize) -> bool {
        self.version == version && self.model == model && self.dims == dims
    }

    /// Number of cached vectors across all entries.
    pub fn vector_count(&self) -> usize {
        self.entries.iter().map(|e| e.vectors.len()).sum()
    }
}

/// Single-key store for the current [`CacheRecord`].
///
/// `put` must replace the previous record atomically: a reader sees either
/// the old record or the new one, never a mix.
#[async_trait]
pub trait IndexCache: Send + Sync {
    /// Short backend identifier used in logs and errors.
    fn backend_name(&self) -> &str;

    /// Fetch the stored record, if any.
    async fn get(&self) -> Result<Option<CacheRecord>>;

    /// Replace the stored record.
    async fn put(&self, record: &CacheRecord) -> Result<()>;

    /// Remove the stored record.
    async fn clear(&self) -> Result<()>;
}

/// A cache that stores nothing.
pub struct DisabledCache;

#[async_trait]
impl IndexCache for DisabledCache {
    fn backend_name(&self) -> &str {
        "disabled"
    }

    async fn get(&self) -> Result<Option<CacheRecord>> {
        Ok(None)
    }

    async fn put(&self, _record: &CacheRecord) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}
