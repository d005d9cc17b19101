//! Error taxonomy for the retrieval engine.

use thiserror::Error;

/// Errors produced by the retrieval engine.
///
/// Cache failures are part of the taxonomy so backends can report them
/// honestly, but the index builder always recovers from them locally:
/// a failed read is a miss, a failed write is a no-op.
#[derive(Debug, Error)]
pub enum CoachError {
    /// The embedding model could not be initialized (download, storage, config).
    #[error("Model load failed ({model}): {message}")]
    ModelLoad {
        /// Model identifier that failed to load.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// An operation needed the model or index before initialization finished.
    #[error("The model is not ready yet")]
    ModelNotReady,

    /// Embedding a single text failed.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Reading the persistent cache failed.
    #[error("Cache read error ({backend}): {message}")]
    CacheRead {
        /// The cache backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// Writing or clearing the persistent cache failed.
    #[error("Cache write error ({backend}): {message}")]
    CacheWrite {
        /// The cache backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The supplied knowledge base violates an invariant.
    #[error("Invalid knowledge base: {0}")]
    InvalidKnowledgeBase(String),

    /// A configuration value is out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The worker is busy initializing and cannot accept this command.
    #[error("Busy: {0}")]
    Busy(String),

    /// A pending operation was abandoned (e.g. initialization interrupted by a reset).
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The worker task has shut down.
    #[error("The coach worker is no longer running")]
    WorkerGone,
}

impl CoachError {
    /// Shorthand for an [`CoachError::Embedding`] error.
    pub fn embedding(provider: impl Into<String>, message: impl Into<String>) -> Self {
        CoachError::Embedding {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`CoachError::ModelLoad`] error.
    pub fn model_load(model: impl Into<String>, message: impl Into<String>) -> Self {
        CoachError::ModelLoad {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Whether this error leaves the session unusable until reset.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoachError::ModelLoad { .. } | CoachError::InvalidKnowledgeBase(_)
        )
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, CoachError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CoachError::model_load("m", "offline").is_fatal());
        assert!(CoachError::InvalidKnowledgeBase("dup".into()).is_fatal());
        assert!(!CoachError::ModelNotReady.is_fatal());
        assert!(!CoachError::embedding("local", "boom").is_fatal());
    }

    #[test]
    fn display_includes_provider() {
        let e = CoachError::embedding("ollama", "connection refused");
        assert_eq!(
            e.to_string(),
            "Embedding error (ollama): connection refused"
        );
    }
}
