//! Shared fixtures: a deterministic bag-of-words embedder and a small
//! knowledge base.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use trail_coach::embedding::EmbedderLoader;
use trail_coach::worker::Coach;
use trail_coach_core::cache::IndexCache;
use trail_coach_core::embedding::{normalize_l2, Embedder};
use trail_coach_core::models::KnowledgeEntry;
use trail_coach_core::progress::{ProgressEvent, ProgressSink};
use trail_coach_core::responder::Responder;
use trail_coach_core::{CoachError, Result};

pub const DIMS: usize = 256;

/// Text that makes [`BagOfWords`] fail.
pub const FAILING_TEXT: &str = "__fail__";

/// Hashes each lowercase word into one of [`DIMS`] buckets.
///
/// Identical texts embed identically (cosine 1.0); texts with no words in
/// common land in disjoint buckets unless two words collide.
pub struct BagOfWords {
    calls: Arc<AtomicUsize>,
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf29ce484222325u64, |h, b| {
        (h ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl Embedder for BagOfWords {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains(FAILING_TEXT) {
            return Err(CoachError::embedding("bag-of-words", "refusing to embed"));
        }
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[(fnv1a(&word.to_lowercase()) % DIMS as u64) as usize] += 1.0;
        }
        Ok(normalize_l2(v))
    }
}

/// Loader for [`BagOfWords`] that counts loads and embedding calls.
///
/// With a gate, `load` waits until the gate is notified.
#[derive(Clone, Default)]
pub struct TestLoader {
    pub loads: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
    pub gate: Option<Arc<Notify>>,
}

impl TestLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbedderLoader for TestLoader {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    async fn load(&self, progress: &dyn ProgressSink) -> Result<Arc<dyn Embedder>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        progress.report(ProgressEvent::new(1, 1, "model"));
        Ok(Arc::new(BagOfWords {
            calls: Arc::clone(&self.calls),
        }))
    }
}

pub fn coach(loader: &TestLoader, cache: Arc<dyn IndexCache>) -> Coach {
    Coach::new(Arc::new(loader.clone()), cache, Responder::default(), 3)
}

fn entry(id: i64, category: &str, phrasings: &[&str], answer: &str, source: &str) -> KnowledgeEntry {
    KnowledgeEntry {
        id,
        category: category.to_string(),
        phrasings: phrasings.iter().map(|p| p.to_string()).collect(),
        answer: answer.to_string(),
        source: source.to_string(),
        rank_hint: id,
    }
}

/// Three entries, six phrasings, no words shared between entries.
pub fn knowledge_base() -> Vec<KnowledgeEntry> {
    vec![
        entry(
            1,
            "nutrizione",
            &[
                "quante proteine servono a un runner vegano",
                "fabbisogno proteico atleta plant based",
            ],
            "X",
            "Y",
        ),
        entry(
            2,
            "allenamento",
            &["come preparo la prima ultramaratona", "piano per ultra trail"],
            "Costruisci il volume gradualmente.",
            "Finding Ultra",
        ),
        entry(
            3,
            "recupero",
            &["stretching dopo corsa lunga", "recovery muscoli gambe"],
            "Idratazione e sonno.",
            "Eat & Run",
        ),
    ]
}

pub const PHRASINGS: usize = 6;
