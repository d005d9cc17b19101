//! The coach session and its worker task.
//!
//! [`Coach`] owns everything a session needs (embedding model, index,
//! cache, responder) and exposes the operations directly; `coach index`
//! and the tests drive it that way. [`spawn`] moves a `Coach` into a
//! dedicated tokio task that talks to callers only through messages:
//!
//! ```text
//!  CoachHandle ──Command──▶ worker task ──CoachEvent──▶ event receiver
//!       ▲                        │
//!       └──── watch<CoachState> ─┘
//! ```
//!
//! # State machine
//!
//! ```text
//! Uninitialized ─init─▶ Loading ─┬─▶ Indexing ─▶ Ready ⇄ Thinking
//!                                └──(cache hit)──▶ Ready
//! Loading / Indexing ──failure──▶ Error
//! any ──reset──▶ Uninitialized
//! ```
//!
//! Commands are handled one at a time in arrival order, with one
//! exception: while initializing, the worker keeps reading its inbox so
//! that queries are rejected with [`CoachError::ModelNotReady`] instead of
//! queueing, and a reset abandons the initialization immediately.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use trail_coach_core::cache::memory::InMemoryCache;
use trail_coach_core::cache::{DisabledCache, IndexCache};
use trail_coach_core::embedding::Embedder;
use trail_coach_core::index::{BuildReport, KnowledgeIndex, INDEXING_LABEL};
use trail_coach_core::models::KnowledgeEntry;
use trail_coach_core::progress::{ProgressEvent, ProgressSink};
use trail_coach_core::responder::{Responder, Response};
use trail_coach_core::{CoachError, Result};

use crate::config::{CacheConfig, Config};
use crate::embedding::{create_loader, EmbedderLoader};
use crate::sqlite_cache::SqliteCache;

/// Open the cache backend named in `[cache] backend`.
///
/// A SQLite database that cannot be opened leaves the session without a
/// persistent cache: every start embeds from scratch, but the coach works.
pub async fn open_cache(config: &CacheConfig) -> anyhow::Result<Arc<dyn IndexCache>> {
    match config.backend.as_str() {
        "sqlite" => match SqliteCache::open(&config.path).await {
            Ok(cache) => Ok(Arc::new(cache)),
            Err(e) => {
                let error = format!("{:#}", e);
                warn!(
                    backend = "sqlite",
                    path = %config.path.display(),
                    error = %error,
                    "cannot open cache database, continuing without cache"
                );
                Ok(Arc::new(DisabledCache))
            }
        },
        "memory" => Ok(Arc::new(InMemoryCache::new())),
        "disabled" => Ok(Arc::new(DisabledCache)),
        other => anyhow::bail!("Unknown cache backend: {}", other),
    }
}

/// One coach session.
pub struct Coach {
    loader: Arc<dyn EmbedderLoader>,
    cache: Arc<dyn IndexCache>,
    responder: Responder,
    top_k: usize,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<KnowledgeIndex>,
}

impl Coach {
    pub fn new(
        loader: Arc<dyn EmbedderLoader>,
        cache: Arc<dyn IndexCache>,
        responder: Responder,
        top_k: usize,
    ) -> Self {
        Self {
            loader,
            cache,
            responder,
            top_k,
            embedder: None,
            index: None,
        }
    }

    /// Build a session from configuration. Nothing is loaded yet.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let loader = create_loader(&config.embedding)?;
        let cache = open_cache(&config.cache).await?;
        Ok(Self::new(
            loader,
            cache,
            config.retrieval.responder()?,
            config.retrieval.top_k,
        ))
    }

    /// The cache this session reads and writes.
    pub fn cache(&self) -> &Arc<dyn IndexCache> {
        &self.cache
    }

    /// Load the embedding model unless it is already loaded.
    pub async fn load_model(&mut self, progress: &dyn ProgressSink) -> Result<Arc<dyn Embedder>> {
        if let Some(embedder) = &self.embedder {
            return Ok(Arc::clone(embedder));
        }
        let embedder = self.loader.load(progress).await?;
        info!(
            model = embedder.model_name(),
            dims = embedder.dims(),
            "embedding model loaded"
        );
        self.embedder = Some(Arc::clone(&embedder));
        Ok(embedder)
    }

    /// Build (or load from cache) the index for `knowledge_base`,
    /// replacing any previous one.
    pub async fn build_index(
        &mut self,
        knowledge_base: Vec<KnowledgeEntry>,
        progress: &dyn ProgressSink,
    ) -> Result<BuildReport> {
        let embedder = self.embedder.clone().ok_or(CoachError::ModelNotReady)?;
        self.index = None;
        let (index, report) = KnowledgeIndex::build(
            knowledge_base,
            embedder.as_ref(),
            self.cache.as_ref(),
            progress,
        )
        .await?;
        self.index = Some(index);
        Ok(report)
    }

    /// [`load_model`](Self::load_model) followed by
    /// [`build_index`](Self::build_index).
    pub async fn initialize(
        &mut self,
        knowledge_base: Vec<KnowledgeEntry>,
        progress: &dyn ProgressSink,
    ) -> Result<BuildReport> {
        self.load_model(progress).await?;
        self.build_index(knowledge_base, progress).await
    }

    /// Answer one question.
    pub async fn answer(&self, text: &str) -> Result<Response> {
        let (embedder, index) = match (&self.embedder, &self.index) {
            (Some(embedder), Some(index)) => (embedder, index),
            _ => return Err(CoachError::ModelNotReady),
        };
        let query = embedder.embed(text).await?;
        let matches = index.query(&query, self.top_k);
        if let Some(best) = matches.first() {
            debug!(entry_id = best.entry.id, score = best.score, "best match");
        }
        Ok(self.responder.respond(&matches))
    }

    /// Drop the model and index and clear the persistent cache.
    ///
    /// A cache that cannot be cleared is logged; the in-memory reset still
    /// happens.
    pub async fn reset(&mut self) {
        self.index = None;
        self.embedder = None;
        if let Err(e) = self.cache.clear().await {
            warn!(backend = self.cache.backend_name(), error = %e, "failed to clear cache");
        }
    }
}

// ============ Worker protocol ============

/// Lifecycle state of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoachState {
    Uninitialized,
    Loading,
    Indexing,
    Ready,
    Thinking,
    /// Initialization failed; a reset or new init is required.
    Error(String),
}

impl CoachState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoachState::Uninitialized => "uninitialized",
            CoachState::Loading => "loading",
            CoachState::Indexing => "indexing",
            CoachState::Ready => "ready",
            CoachState::Thinking => "thinking",
            CoachState::Error(_) => "error",
        }
    }

    /// Whether initialization has finished, successfully or not.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            CoachState::Ready | CoachState::Thinking | CoachState::Error(_)
        )
    }
}

/// Events emitted by the worker, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CoachEvent {
    Status { text: String },
    /// Model loading progress.
    Progress { percent: u8, label: String },
    /// Cold index build progress, in phrasings.
    Indexing { done: usize, total: usize },
    Ready,
    Thinking,
    Answer(Response),
    Error { message: String },
    ResetDone,
}

enum Command {
    Init {
        knowledge_base: Vec<KnowledgeEntry>,
        reply: Option<oneshot::Sender<Result<BuildReport>>>,
    },
    Query {
        text: String,
        reply: Option<oneshot::Sender<Result<Response>>>,
    },
    Reset {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Cloneable handle to a running worker.
#[derive(Clone)]
pub struct CoachHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<CoachState>,
}

impl CoachHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CoachError::WorkerGone)
    }

    /// Current worker state.
    pub fn state(&self) -> CoachState {
        self.state.borrow().clone()
    }

    /// Begin initialization without waiting for it.
    pub fn start(&self, knowledge_base: Vec<KnowledgeEntry>) -> Result<()> {
        self.send(Command::Init {
            knowledge_base,
            reply: None,
        })
    }

    /// Initialize and wait until the worker is ready or has failed.
    pub async fn init(&self, knowledge_base: Vec<KnowledgeEntry>) -> Result<BuildReport> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Init {
            knowledge_base,
            reply: Some(tx),
        })?;
        rx.await.map_err(|_| CoachError::WorkerGone)?
    }

    /// Ask a question and wait for its answer.
    pub async fn ask(&self, text: impl Into<String>) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Query {
            text: text.into(),
            reply: Some(tx),
        })?;
        rx.await.map_err(|_| CoachError::WorkerGone)?
    }

    /// Reset the session and wait for `reset-done`.
    pub async fn reset(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Reset { reply: Some(tx) })?;
        rx.await.map_err(|_| CoachError::WorkerGone)
    }

    /// Wait until the state satisfies `pred`.
    pub async fn wait_for(&self, pred: impl Fn(&CoachState) -> bool) -> Result<CoachState> {
        let mut state = self.state.clone();
        let current = state
            .wait_for(|s| pred(s))
            .await
            .map_err(|_| CoachError::WorkerGone)?;
        Ok(current.clone())
    }
}

/// Move `coach` into a new worker task.
///
/// The task runs until every [`CoachHandle`] is dropped. Events are
/// buffered without bound; drop the receiver to discard them.
pub fn spawn(coach: Coach) -> (CoachHandle, mpsc::UnboundedReceiver<CoachEvent>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(CoachState::Uninitialized);

    let worker = Worker {
        coach,
        commands: command_rx,
        events: event_tx,
        state: state_tx,
    };
    tokio::spawn(worker.run());

    (
        CoachHandle {
            commands: command_tx,
            state: state_rx,
        },
        event_rx,
    )
}

struct Worker {
    coach: Coach,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<CoachEvent>,
    state: watch::Sender<CoachState>,
}

enum InitOutcome {
    Finished(Result<BuildReport>),
    Reset(Option<oneshot::Sender<()>>),
    Closed,
}

fn emit(events: &mpsc::UnboundedSender<CoachEvent>, event: CoachEvent) {
    // A dropped receiver only means nobody is listening.
    let _ = events.send(event);
}

fn set_state(state: &watch::Sender<CoachState>, next: CoachState) {
    debug!(state = next.as_str(), "coach state");
    state.send_replace(next);
}

fn reject_not_ready(
    events: &mpsc::UnboundedSender<CoachEvent>,
    reply: Option<oneshot::Sender<Result<Response>>>,
) {
    emit(
        events,
        CoachEvent::Error {
            message: CoachError::ModelNotReady.to_string(),
        },
    );
    if let Some(reply) = reply {
        let _ = reply.send(Err(CoachError::ModelNotReady));
    }
}

impl Worker {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Init {
                    knowledge_base,
                    reply,
                } => {
                    if !self.init(knowledge_base, reply).await {
                        break;
                    }
                }
                Command::Query { text, reply } => self.query(text, reply).await,
                Command::Reset { reply } => self.reset(reply).await,
            }
        }
        debug!("coach worker stopped");
    }

    /// Returns `false` when the command channel closed mid-initialization.
    async fn init(
        &mut self,
        knowledge_base: Vec<KnowledgeEntry>,
        reply: Option<oneshot::Sender<Result<BuildReport>>>,
    ) -> bool {
        set_state(&self.state, CoachState::Loading);

        let events = &self.events;
        let state = &self.state;
        let commands = &mut self.commands;
        let coach = &mut self.coach;

        let sink = |event: ProgressEvent| {
            if event.label == INDEXING_LABEL {
                state.send_if_modified(|s| {
                    if *s == CoachState::Loading {
                        debug!(state = "indexing", "coach state");
                        *s = CoachState::Indexing;
                        true
                    } else {
                        false
                    }
                });
                emit(
                    events,
                    CoachEvent::Indexing {
                        done: event.completed,
                        total: event.total,
                    },
                );
            } else {
                emit(
                    events,
                    CoachEvent::Progress {
                        percent: event.percent(),
                        label: event.label,
                    },
                );
            }
        };

        let outcome = {
            let init = async {
                emit(
                    events,
                    CoachEvent::Status {
                        text: "Loading the language model...".to_string(),
                    },
                );
                let embedder = coach.load_model(&sink).await?;
                emit(
                    events,
                    CoachEvent::Status {
                        text: format!("Model {} loaded.", embedder.model_name()),
                    },
                );
                emit(
                    events,
                    CoachEvent::Status {
                        text: "Preparing the knowledge base...".to_string(),
                    },
                );
                coach.build_index(knowledge_base, &sink).await
            };
            tokio::pin!(init);

            loop {
                tokio::select! {
                    result = &mut init => break InitOutcome::Finished(result),
                    command = commands.recv() => match command {
                        Some(Command::Query { reply, .. }) => reject_not_ready(events, reply),
                        Some(Command::Init { reply, .. }) => {
                            if let Some(reply) = reply {
                                let _ = reply.send(Err(CoachError::Busy(
                                    "initialization already in progress".to_string(),
                                )));
                            }
                        }
                        Some(Command::Reset { reply }) => break InitOutcome::Reset(reply),
                        None => break InitOutcome::Closed,
                    }
                }
            }
        };

        match outcome {
            InitOutcome::Finished(Ok(report)) => {
                info!(
                    source = report.source.as_str(),
                    entries = report.entries,
                    embedded = report.embedded,
                    "coach ready"
                );
                set_state(&self.state, CoachState::Ready);
                emit(&self.events, CoachEvent::Ready);
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(report));
                }
                true
            }
            InitOutcome::Finished(Err(e)) => {
                warn!(error = %e, "coach initialization failed");
                set_state(&self.state, CoachState::Error(e.to_string()));
                emit(
                    &self.events,
                    CoachEvent::Error {
                        message: e.to_string(),
                    },
                );
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
                true
            }
            InitOutcome::Reset(reset_reply) => {
                info!("initialization abandoned by reset");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(CoachError::Cancelled(
                        "initialization abandoned by reset".to_string(),
                    )));
                }
                self.reset(reset_reply).await;
                true
            }
            InitOutcome::Closed => false,
        }
    }

    async fn query(&mut self, text: String, reply: Option<oneshot::Sender<Result<Response>>>) {
        if *self.state.borrow() != CoachState::Ready {
            reject_not_ready(&self.events, reply);
            return;
        }

        set_state(&self.state, CoachState::Thinking);
        emit(&self.events, CoachEvent::Thinking);

        let result = self.coach.answer(&text).await;
        match &result {
            Ok(response) => emit(&self.events, CoachEvent::Answer(response.clone())),
            Err(e) => {
                warn!(error = %e, "query failed");
                emit(
                    &self.events,
                    CoachEvent::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
        // A failed query never poisons the session.
        set_state(&self.state, CoachState::Ready);
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    async fn reset(&mut self, reply: Option<oneshot::Sender<()>>) {
        self.coach.reset().await;
        set_state(&self.state, CoachState::Uninitialized);
        emit(&self.events, CoachEvent::ResetDone);
        info!("coach reset");
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }
}
