//! # Trail Coach
//!
//! Semantic question answering over a small, curated knowledge base of
//! running and plant-based nutrition Q&A.
//!
//! Every registered phrasing of every entry is embedded once; a question is
//! embedded the same way and each entry scores as its best-matching
//! phrasing. A two-threshold confidence gate decides between a direct
//! answer and a fallback. Phrasing embeddings are cached in SQLite, keyed by
//! a fingerprint of the knowledge base, so restarts cost no embedding calls.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ knowledge    │──▶│ worker task  │──▶│ SQLite      │
//! │ base (JSON)  │   │ embed+index  │◀──│ index cache │
//! └──────────────┘   └──────┬───────┘   └─────────────┘
//!                           │ events / answers
//!                 ┌─────────┴─────────┐
//!                 ▼                   ▼
//!           ┌──────────┐        ┌──────────┐
//!           │   CLI    │        │   HTTP   │
//!           │ (coach)  │        │  (axum)  │
//!           └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! coach init                       # create the cache database
//! coach index                      # embed the knowledge base once
//! coach ask "cosa mangio prima di una gara?"
//! coach chat                       # interactive session
//! coach serve                      # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`knowledge`] | Knowledge base loading and listing |
//! | [`embedding`] | Embedding backends (fastembed, Ollama) |
//! | [`sqlite_cache`] | Persistent index cache |
//! | [`worker`] | Coach session and worker task |
//! | [`ask`] | `ask` and `chat` commands |
//! | [`index_cmd`] | `index` and `reset` commands |
//! | [`progress`] | CLI progress rendering |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//!
//! Retrieval itself (models, index builder, retriever, confidence gate)
//! lives in the runtime-free `trail-coach-core` crate.

pub mod ask;
pub mod config;
pub mod db;
pub mod embedding;
pub mod index_cmd;
pub mod knowledge;
pub mod migrate;
pub mod progress;
pub mod server;
pub mod sqlite_cache;
pub mod worker;

pub use trail_coach_core as core;
