//! Error taxonomy shared by every component.
//!
//! Each variant tells the caller how to react:
//!
//! | Variant | Meaning | Retry? |
//! |---------|---------|--------|
//! | [`InvalidArgument`](RagError::InvalidArgument) | bad caller input | no |
//! | [`NotFound`](RagError::NotFound) | missing row | no |
//! | [`Upstream`](RagError::Upstream) | provider HTTP failure or malformed/empty response | at the operation level |
//! | [`Storage`](RagError::Storage) | connectivity or constraint failure | no, fatal for the operation |
//! | [`Dependency`](RagError::Dependency) | health probe failure, tagged with the dependency | operator action |
//! | [`Cancelled`](RagError::Cancelled) | the operation observed a cancellation signal | caller decides |
//! | [`Config`](RagError::Config) | missing or invalid configuration | no |

use std::fmt;

/// Library-wide result alias.
pub type Result<T> = std::result::Result<T, RagError>;

/// The external services the core talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Storage,
    Embedding,
    Reranker,
    Completion,
}

impl Dependency {
    /// Lowercase tag used in logs, CLI output and HTTP error bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            Dependency::Storage => "storage",
            Dependency::Embedding => "embedding",
            Dependency::Reranker => "reranker",
            Dependency::Completion => "completion",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// `stage` names the provider call that failed (e.g. `"embedding"`, `"rerank"`).
    #[error("{stage} upstream error: {message}")]
    Upstream { stage: &'static str, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("dependency '{dependency}' is unhealthy: {source}")]
    Dependency {
        dependency: Dependency,
        #[source]
        source: Box<RagError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl RagError {
    pub fn invalid(message: impl Into<String>) -> Self {
        RagError::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        RagError::NotFound(message.into())
    }

    pub fn upstream(stage: &'static str, message: impl Into<String>) -> Self {
        RagError::Upstream {
            stage,
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        RagError::Storage(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        RagError::Config(message.into())
    }

    /// Wraps `self` as a health failure of `dependency`.
    pub fn for_dependency(self, dependency: Dependency) -> Self {
        RagError::Dependency {
            dependency,
            source: Box::new(self),
        }
    }

    /// The failing dependency, if this is a [`RagError::Dependency`].
    pub fn dependency(&self) -> Option<Dependency> {
        match self {
            RagError::Dependency { dependency, .. } => Some(*dependency),
            _ => None,
        }
    }

    /// Whether retrying the whole operation later can succeed without
    /// the caller changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::Upstream { .. } | RagError::Dependency { .. })
    }
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RagError::NotFound("row not found".to_string()),
            other => RagError::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::InvalidArgument(err.to_string())
    }
}
