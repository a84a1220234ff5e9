//! Failure kinds for indexing and retrieval.

use std::path::PathBuf;
use vaultrag_models::ModelError;

pub type Result<T> = std::result::Result<T, RetrieverError>;

#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    /// A model service or the store could not be reached, or timed out.
    #[error("external service unavailable: {source}")]
    Transient {
        #[source]
        source: ModelError,
    },

    /// The note could not be read or its front matter could not be parsed.
    #[error("malformed document {path}: {reason}")]
    MalformedDocument { path: PathBuf, reason: String },

    /// Missing or inconsistent settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A model service answered, but the answer cannot be used.
    #[error("model service error: {source}")]
    Model {
        #[source]
        source: ModelError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ModelError> for RetrieverError {
    fn from(source: ModelError) -> Self {
        if source.is_transient() {
            Self::Transient { source }
        } else {
            Self::Model { source }
        }
    }
}

impl RetrieverError {
    pub fn malformed<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::MalformedDocument {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Short label used in batch reports and logs.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } => FailureKind::Transient,
            Self::MalformedDocument { .. } => FailureKind::MalformedDocument,
            Self::Configuration(_) => FailureKind::Configuration,
            Self::Storage(_) => FailureKind::Storage,
            Self::Model { .. } => FailureKind::Model,
            Self::Io(_) => FailureKind::Io,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    MalformedDocument,
    Configuration,
    Storage,
    Model,
    Io,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::Transient => "transient",
            FailureKind::MalformedDocument => "malformed-document",
            FailureKind::Configuration => "configuration",
            FailureKind::Storage => "storage",
            FailureKind::Model => "model",
            FailureKind::Io => "io",
        };
        f.write_str(label)
    }
}
