//! Knowledge-base index construction.
//!
//! [`KnowledgeIndex::build`] turns a knowledge base into one embedding per
//! phrasing, preferring the persistent cache:
//!
//! 1. Validate the knowledge base and compute its fingerprint.
//! 2. Read the cache. Read failures count as a miss.
//! 3. **Hit** (same fingerprint, model, and dims): pair every entry with its
//!    cached vectors. Entries absent from the cache are dropped. Phrasings
//!    whose text hash changed are re-embedded and the cache is rewritten.
//! 4. **Miss**: embed every phrasing of every entry in batches of
//!    [`PROGRESS_EVERY`], reporting progress after each batch, then write a
//!    fresh record.
//!    Write failures are logged and ignored.

use tracing::{debug, info, warn};

use crate::cache::{CacheRecord, CachedEntry, CachedVector, IndexCache};
use crate::embedding::Embedder;
use crate::error::{CoachError, Result};
use crate::fingerprint::{fingerprint, phrasing_hash};
use crate::models::{total_phrasings, validate_knowledge_base, IndexedEntry, KnowledgeEntry};
use crate::progress::{ProgressEvent, ProgressSink};

/// Phrasings per embedding batch; progress is reported after each batch.
pub const PROGRESS_EVERY: usize = 10;

/// Progress label used for index builds.
pub const INDEXING_LABEL: &str = "indexing";

/// Where the vectors of a built index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    /// Every vector was reused from the cache.
    Cache,
    /// The cache matched but some edited phrasings were re-embedded.
    Refreshed,
    /// Every phrasing was embedded.
    Fresh,
}

impl IndexSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexSource::Cache => "cache",
            IndexSource::Refreshed => "refreshed",
            IndexSource::Fresh => "fresh",
        }
    }
}

/// Summary of one index build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub source: IndexSource,
    pub version: String,
    /// Entries in the finished index.
    pub entries: usize,
    /// Phrasing vectors in the finished index.
    pub phrasings: usize,
    /// Embedding calls made during the build.
    pub embedded: usize,
    /// Knowledge entries left out because the cache had no usable vectors.
    pub dropped: usize,
    /// Whether the cache was (re)written successfully.
    pub cache_written: bool,
}

/// Immutable in-memory index: knowledge entries paired with their
/// phrasing embeddings, in knowledge-base order.
#[derive(Debug, Clone)]
pub struct KnowledgeIndex {
    version: String,
    model: String,
    dims: usize,
    entries: Vec<KnowledgeEntry>,
    indexed: Vec<IndexedEntry>,
}

impl KnowledgeIndex {
    /// Assemble an index from already-computed parts.
    ///
    /// `pairs` keeps its order. Every entry must carry exactly one vector
    /// of `dims` components per phrasing.
    pub fn from_parts(
        version: impl Into<String>,
        model: impl Into<String>,
        dims: usize,
        pairs: Vec<(KnowledgeEntry, Vec<Vec<f32>>)>,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(pairs.len());
        let mut indexed = Vec::with_capacity(pairs.len());
        for (entry, embeddings) in pairs {
            if embeddings.len() != entry.phrasings.len() {
                return Err(CoachError::InvalidKnowledgeBase(format!(
                    "entry {} has {} phrasings but {} vectors",
                    entry.id,
                    entry.phrasings.len(),
                    embeddings.len()
                )));
            }
            if let Some(bad) = embeddings.iter().find(|v| v.len() != dims) {
                return Err(CoachError::InvalidKnowledgeBase(format!(
                    "entry {} has a {}-dimensional vector, expected {}",
                    entry.id,
                    bad.len(),
                    dims
                )));
            }
            indexed.push(IndexedEntry {
                id: entry.id,
                embeddings,
            });
            entries.push(entry);
        }
        Ok(Self {
            version: version.into(),
            model: model.into(),
            dims,
            entries,
            indexed,
        })
    }

    /// Build the index for `knowledge_base`, loading from or writing to `cache`.
    pub async fn build(
        knowledge_base: Vec<KnowledgeEntry>,
        embedder: &dyn Embedder,
        cache: &dyn IndexCache,
        progress: &dyn ProgressSink,
    ) -> Result<(Self, BuildReport)> {
        validate_knowledge_base(&knowledge_base)?;
        let version = fingerprint(&knowledge_base);
        let model = embedder.model_name().to_string();
        let dims = embedder.dims();

        let cached = match cache.get().await {
            Ok(record) => record,
            Err(e) => {
                warn!(backend = cache.backend_name(), error = %e, "cache read failed, treating as miss");
                None
            }
        };

        match cached {
            Some(record) if record.is_usable_for(&version, &model, dims) => {
                debug!(version = %version, vectors = record.vector_count(), "index cache hit");
                Self::from_cache(knowledge_base, record, version, embedder, cache, progress).await
            }
            Some(record) => {
                info!(
                    cached_version = %record.version,
                    cached_model = %record.model,
                    version = %version,
                    "index cache is stale, rebuilding"
                );
                Self::cold(knowledge_base, version, embedder, cache, progress).await
            }
            None => {
                debug!(version = %version, "index cache miss");
                Self::cold(knowledge_base, version, embedder, cache, progress).await
            }
        }
    }

    async fn cold(
        knowledge_base: Vec<KnowledgeEntry>,
        version: String,
        embedder: &dyn Embedder,
        cache: &dyn IndexCache,
        progress: &dyn ProgressSink,
    ) -> Result<(Self, BuildReport)> {
        let total = total_phrasings(&knowledge_base);
        let dims = embedder.dims();
        let texts: Vec<String> = knowledge_base
            .iter()
            .flat_map(|entry| entry.phrasings.iter().cloned())
            .collect();
        let mut vectors = embed_in_batches(embedder, &texts, dims, progress)
            .await?
            .into_iter();

        let mut pairs = Vec::with_capacity(knowledge_base.len());
        for entry in knowledge_base {
            let embeddings: Vec<Vec<f32>> = vectors.by_ref().take(entry.phrasings.len()).collect();
            pairs.push((entry, embeddings));
        }

        let index = Self::from_parts(version, embedder.model_name(), dims, pairs)?;
        let cache_written = index.save(cache).await;
        let report = BuildReport {
            source: IndexSource::Fresh,
            version: index.version.clone(),
            entries: index.len(),
            phrasings: index.phrasing_count(),
            embedded: total,
            dropped: 0,
            cache_written,
        };
        info!(
            entries = report.entries,
            phrasings = report.phrasings,
            cache_written,
            "index built from scratch"
        );
        Ok((index, report))
    }

    async fn from_cache(
        knowledge_base: Vec<KnowledgeEntry>,
        record: CacheRecord,
        version: String,
        embedder: &dyn Embedder,
        cache: &dyn IndexCache,
        progress: &dyn ProgressSink,
    ) -> Result<(Self, BuildReport)> {
        let dims = embedder.dims();
        let mut cached = record.into_map();
        let mut dropped = 0usize;
        let mut pending: Vec<(usize, usize)> = Vec::new();
        let mut pairs: Vec<(KnowledgeEntry, Vec<Option<Vec<f32>>>)> = Vec::new();

        for entry in knowledge_base {
            let vectors = match cached.remove(&entry.id) {
                Some(v) if v.len() == entry.phrasings.len() => v,
                Some(_) | None => {
                    debug!(entry_id = entry.id, "no usable cached vectors, dropping entry");
                    dropped += 1;
                    continue;
                }
            };
            let slot = pairs.len();
            let reused: Vec<Option<Vec<f32>>> = entry
                .phrasings
                .iter()
                .zip(vectors)
                .enumerate()
                .map(|(i, (phrasing, cv))| {
                    if cv.hash == phrasing_hash(phrasing) && cv.embedding.len() == dims {
                        Some(cv.embedding)
                    } else {
                        pending.push((slot, i));
                        None
                    }
                })
                .collect();
            pairs.push((entry, reused));
        }

        if !cached.is_empty() {
            debug!(stale = cached.len(), "ignoring cached entries absent from the knowledge base");
        }

        let total = pending.len();
        let texts: Vec<String> = pending
            .iter()
            .map(|&(slot, i)| pairs[slot].0.phrasings[i].clone())
            .collect();
        let vectors = embed_in_batches(embedder, &texts, dims, progress).await?;
        for (&(slot, i), vector) in pending.iter().zip(vectors) {
            pairs[slot].1[i] = Some(vector);
        }

        let pairs = pairs
            .into_iter()
            .map(|(entry, vectors)| {
                let vectors: Vec<Vec<f32>> = vectors.into_iter().flatten().collect();
                (entry, vectors)
            })
            .collect();
        let index = Self::from_parts(version, embedder.model_name(), dims, pairs)?;

        let (source, cache_written) = if total > 0 {
            info!(refreshed = total, "re-embedded edited phrasings");
            (IndexSource::Refreshed, index.save(cache).await)
        } else {
            (IndexSource::Cache, false)
        };

        let report = BuildReport {
            source,
            version: index.version.clone(),
            entries: index.len(),
            phrasings: index.phrasing_count(),
            embedded: total,
            dropped,
            cache_written,
        };
        info!(
            entries = report.entries,
            dropped,
            source = source.as_str(),
            "index loaded from cache"
        );
        Ok((index, report))
    }

    /// Write this index to `cache`. Returns whether the write succeeded.
    pub async fn save(&self, cache: &dyn IndexCache) -> bool {
        match cache.put(&self.to_record()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(backend = cache.backend_name(), error = %e, "cache write failed, continuing without cache");
                false
            }
        }
    }

    /// Snapshot of this index as a [`CacheRecord`].
    pub fn to_record(&self) -> CacheRecord {
        let entries = self
            .iter()
            .map(|(entry, indexed)| CachedEntry {
                id: entry.id,
                vectors: entry
                    .phrasings
                    .iter()
                    .zip(&indexed.embeddings)
                    .map(|(phrasing, embedding)| CachedVector {
                        hash: phrasing_hash(phrasing),
                        embedding: embedding.clone(),
                    })
                    .collect(),
            })
            .collect();
        CacheRecord {
            version: self.version.clone(),
            model: self.model.clone(),
            dims: self.dims,
            created_at: chrono::Utc::now().timestamp(),
            entries,
        }
    }

    /// Entries paired with their embeddings, in knowledge-base order.
    pub fn iter(&self) -> impl Iterator<Item = (&KnowledgeEntry, &IndexedEntry)> {
        self.entries.iter().zip(self.indexed.iter())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn phrasing_count(&self) -> usize {
        self.indexed.iter().map(|e| e.embeddings.len()).sum()
    }
}

/// Embed `texts` in batches of [`PROGRESS_EVERY`], reporting progress after
/// each batch. Output order matches `texts`.
async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    dims: usize,
    progress: &dyn ProgressSink,
) -> Result<Vec<Vec<f32>>> {
    let total = texts.len();
    let mut out = Vec::with_capacity(total);
    for batch in texts.chunks(PROGRESS_EVERY) {
        let vectors = embedder.embed_batch(batch).await?;
        if vectors.len() != batch.len() {
            return Err(CoachError::embedding(
                embedder.model_name(),
                format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(CoachError::embedding(
                embedder.model_name(),
                format!("expected {} dimensions, got {}", dims, bad.len()),
            ));
        }
        out.extend(vectors);
        progress.report(ProgressEvent::new(out.len(), total, INDEXING_LABEL));
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Deterministic embedder: one-hot on a hash of the text, so equal
    /// texts collide and different texts are (almost always) orthogonal.
    pub(crate) struct OneHotEmbedder {
        pub calls: AtomicUsize,
        pub dims: usize,
    }

    impl OneHotEmbedder {
        pub(crate) fn new(dims: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                dims,
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for OneHotEmbedder {
        fn model_name(&self) -> &str {
            "one-hot"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let slot = text
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
                % self.dims;
            let mut v = vec![0.0; self.dims];
            v[slot] = 1.0;
            Ok(v)
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl IndexCache for BrokenCache {
        fn backend_name(&self) -> &str {
            "broken"
        }
        async fn get(&self) -> Result<Option<CacheRecord>> {
            Err(CoachError::CacheRead {
                backend: "broken".into(),
                message: "disk on fire".into(),
            })
        }
        async fn put(&self, _record: &CacheRecord) -> Result<()> {
            Err(CoachError::CacheWrite {
                backend: "broken".into(),
                message: "read-only".into(),
            })
        }
        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) fn entry(id: i64, phrasings: &[&str]) -> KnowledgeEntry {
        KnowledgeEntry {
            id,
            category: "nutrizione".to_string(),
            phrasings: phrasings.iter().map(|p| p.to_string()).collect(),
            answer: format!("answer {}", id),
            source: format!("source {}", id),
            rank_hint: id,
        }
    }

    fn kb() -> Vec<KnowledgeEntry> {
        vec![
            entry(1, &["Cosa mangiare prima di una gara?", "pasto pre gara"]),
            entry(2, &["Cosa mangiare dopo una gara?"]),
            entry(3, &["Quali integratori per un runner vegano?", "B12", "vitamina D"]),
        ]
    }

    #[tokio::test]
    async fn cold_build_embeds_every_phrasing_and_writes_cache() {
        let embedder = OneHotEmbedder::new(64);
        let cache = InMemoryCache::new();
        let (index, report) = KnowledgeIndex::build(kb(), &embedder, &cache, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.source, IndexSource::Fresh);
        assert_eq!(report.embedded, 6);
        assert_eq!(embedder.calls(), 6);
        assert!(report.cache_written);
        assert_eq!(index.len(), 3);
        assert_eq!(index.phrasing_count(), 6);
        assert!(cache.is_populated());
    }

    #[tokio::test]
    async fn warm_build_makes_no_embedding_calls() {
        let embedder = OneHotEmbedder::new(64);
        let cache = InMemoryCache::new();
        let (first, _) = KnowledgeIndex::build(kb(), &embedder, &cache, &NoProgress)
            .await
            .unwrap();

        let warm = OneHotEmbedder::new(64);
        let (second, report) = KnowledgeIndex::build(kb(), &warm, &cache, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.source, IndexSource::Cache);
        assert_eq!(warm.calls(), 0);
        assert_eq!(report.embedded, 0);
        for ((_, a), (_, b)) in first.iter().zip(second.iter()) {
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn fingerprint_change_rebuilds_everything() {
        let embedder = OneHotEmbedder::new(64);
        let cache = InMemoryCache::new();
        KnowledgeIndex::build(kb(), &embedder, &cache, &NoProgress)
            .await
            .unwrap();

        let mut changed = kb();
        changed[1].phrasings.push("What to eat after a race?".to_string());
        let rebuild = OneHotEmbedder::new(64);
        let (_, report) = KnowledgeIndex::build(changed, &rebuild, &cache, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.source, IndexSource::Fresh);
        assert_eq!(rebuild.calls(), 7);
    }

    #[tokio::test]
    async fn model_change_rebuilds_everything() {
        let cache = InMemoryCache::new();
        KnowledgeIndex::build(kb(), &OneHotEmbedder::new(64), &cache, &NoProgress)
            .await
            .unwrap();

        let wider = OneHotEmbedder::new(128);
        let (_, report) = KnowledgeIndex::build(kb(), &wider, &cache, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.source, IndexSource::Fresh);
        assert_eq!(wider.calls(), 6);
    }

    #[tokio::test]
    async fn edited_phrasing_is_reembedded_alone() {
        let cache = InMemoryCache::new();
        KnowledgeIndex::build(kb(), &OneHotEmbedder::new(64), &cache, &NoProgress)
            .await
            .unwrap();

        let mut edited = kb();
        edited[2].phrasings[1] = "vitamina B12".to_string();
        let embedder = OneHotEmbedder::new(64);
        let (index, report) = KnowledgeIndex::build(edited, &embedder, &cache, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.source, IndexSource::Refreshed);
        assert_eq!(embedder.calls(), 1);
        assert!(report.cache_written);
        assert_eq!(index.phrasing_count(), 6);

        let again = OneHotEmbedder::new(64);
        let mut edited = kb();
        edited[2].phrasings[1] = "vitamina B12".to_string();
        let (_, report) = KnowledgeIndex::build(edited, &again, &cache, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.source, IndexSource::Cache);
        assert_eq!(again.calls(), 0);
    }

    #[tokio::test]
    async fn entries_missing_from_cache_are_dropped() {
        let embedder = OneHotEmbedder::new(64);
        let cache = InMemoryCache::new();
        let (index, _) = KnowledgeIndex::build(kb(), &embedder, &cache, &NoProgress)
            .await
            .unwrap();

        // Simulate a partial cache that still carries the current version.
        let mut record = index.to_record();
        record.entries.retain(|e| e.id != 2);
        cache.put(&record).await.unwrap();

        let warm = OneHotEmbedder::new(64);
        let (index, report) = KnowledgeIndex::build(kb(), &warm, &cache, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(index.len(), 2);
        assert!(index.iter().all(|(e, _)| e.id != 2));
        assert_eq!(warm.calls(), 0);
    }

    #[tokio::test]
    async fn broken_cache_never_fails_the_build() {
        let embedder = OneHotEmbedder::new(64);
        let (index, report) = KnowledgeIndex::build(kb(), &embedder, &BrokenCache, &NoProgress)
            .await
            .unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(report.source, IndexSource::Fresh);
        assert!(!report.cache_written);
    }

    #[tokio::test]
    async fn progress_every_ten_and_at_end() {
        let phrasings: Vec<String> = (0..23).map(|i| format!("domanda {}", i)).collect();
        let refs: Vec<&str> = phrasings.iter().map(|s| s.as_str()).collect();
        let knowledge = vec![entry(1, &refs[..15]), entry(2, &refs[15..])];

        let seen = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| seen.lock().unwrap().push((e.completed, e.total));
        KnowledgeIndex::build(knowledge, &OneHotEmbedder::new(64), &InMemoryCache::new(), &sink)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(10, 23), (20, 23), (23, 23)]);
    }

    /// Records the size of every batch it receives.
    struct BatchRecorder {
        inner: OneHotEmbedder,
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Embedder for BatchRecorder {
        fn model_name(&self) -> &str {
            "one-hot"
        }
        fn dims(&self) -> usize {
            self.inner.dims
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            panic!("index builds must embed in batches");
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.inner.embed(text).await?);
            }
            Ok(out)
        }
    }

    #[tokio::test]
    async fn phrasings_are_embedded_in_batches_across_entries() {
        let phrasings: Vec<String> = (0..23).map(|i| format!("domanda {}", i)).collect();
        let refs: Vec<&str> = phrasings.iter().map(|s| s.as_str()).collect();
        let knowledge = vec![entry(1, &refs[..7]), entry(2, &refs[7..19]), entry(3, &refs[19..])];

        let embedder = BatchRecorder {
            inner: OneHotEmbedder::new(64),
            batches: Mutex::new(Vec::new()),
        };
        let cache = InMemoryCache::new();
        let (index, report) = KnowledgeIndex::build(knowledge.clone(), &embedder, &cache, &NoProgress)
            .await
            .unwrap();
        assert_eq!(*embedder.batches.lock().unwrap(), vec![10, 10, 3]);
        assert_eq!(report.embedded, 23);

        // Vectors stay aligned with their own entry and phrasing.
        let reference = OneHotEmbedder::new(64);
        for (entry, indexed) in index.iter() {
            for (phrasing, vector) in entry.phrasings.iter().zip(&indexed.embeddings) {
                assert_eq!(*vector, reference.embed(phrasing).await.unwrap());
            }
        }

        // Edited phrasings are refreshed through the same batched path.
        let mut edited = knowledge;
        edited[0].phrasings[2] = "domanda modificata".to_string();
        edited[2].phrasings[0] = "altra domanda".to_string();
        embedder.batches.lock().unwrap().clear();
        let (_, report) = KnowledgeIndex::build(edited, &embedder, &cache, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.source, IndexSource::Refreshed);
        assert_eq!(*embedder.batches.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn invalid_knowledge_base_is_rejected() {
        let knowledge = vec![entry(1, &["a"]), entry(1, &["b"])];
        let err = KnowledgeIndex::build(
            knowledge,
            &OneHotEmbedder::new(8),
            &InMemoryCache::new(),
            &NoProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoachError::InvalidKnowledgeBase(_)));
    }

    #[test]
    fn from_parts_rejects_misaligned_vectors() {
        let err = KnowledgeIndex::from_parts(
            "v",
            "m",
            2,
            vec![(entry(1, &["a", "b"]), vec![vec![1.0, 0.0]])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("2 phrasings but 1 vectors"));

        let err = KnowledgeIndex::from_parts("v", "m", 2, vec![(entry(1, &["a"]), vec![vec![1.0]])])
            .unwrap_err();
        assert!(err.to_string().contains("1-dimensional"));
    }
}
