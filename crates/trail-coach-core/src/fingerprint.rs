//! Knowledge-base fingerprinting.
//!
//! The cache [`version`](crate::cache::CacheRecord::version) is a SHA-256
//! digest of the knowledge base's structure: the sorted list of
//! `id:phrasing_count` pairs. Entry order does not matter; adding or
//! removing an entry, or changing how many phrasings an entry has, changes
//! the fingerprint.
//!
//! Edits that keep the phrasing count are caught one level down, by the
//! per-phrasing [`phrasing_hash`] stored next to each cached vector.

use sha2::{Digest, Sha256};

use crate::models::KnowledgeEntry;

/// Structural fingerprint of a knowledge base.
pub fn fingerprint(entries: &[KnowledgeEntry]) -> String {
    let mut pairs: Vec<(i64, usize)> = entries
        .iter()
        .map(|e| (e.id, e.phrasings.len()))
        .collect();
    pairs.sort_unstable();

    let canonical = pairs
        .iter()
        .map(|(id, count)| format!("{}:{}", id, count))
        .collect::<Vec<_>>()
        .join(",");

    sha256_hex(canonical.as_bytes())
}

/// Content hash of a single phrasing.
pub fn phrasing_hash(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
