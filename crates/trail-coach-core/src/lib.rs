//! # Trail Coach Core
//!
//! Runtime-agnostic logic for the Trail Coach retrieval engine: knowledge
//! models, the error taxonomy, vector math, knowledge-base fingerprinting,
//! the cache abstraction, the index builder, the retriever, and the
//! confidence gate.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Embedding backends and persistent cache
//! backends live in the `trail-coach` app crate.
//!
//! ## Pipeline
//!
//! ```text
//! KnowledgeEntry[] ──fingerprint──▶ IndexCache ──hit──┐
//!        │                                            ▼
//!        └──────────── Embedder (miss) ─────────▶ KnowledgeIndex
//!                                                     │
//!          query vector ──▶ retriever::top_k ◀────────┘
//!                                 │
//!                                 ▼
//!                      responder::respond ──▶ Response
//! ```

pub mod cache;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod models;
pub mod progress;
pub mod responder;
pub mod retriever;

pub use error::{CoachError, Result};
