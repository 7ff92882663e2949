use serde::Serialize;
use thiserror::Error;

/// Unified error type for backstitch operations
#[derive(Debug, Error)]
pub enum BackstitchError {
    // Engine errors
    #[error("automerge error: {0}")]
    Automerge(#[from] automerge::AutomergeError),

    // Schema errors
    #[error("document has no '{0}' entry")]
    MissingEntry(&'static str),

    #[error("document entry '{key}' is not a {expected}")]
    WrongEntryType {
        key: &'static str,
        expected: &'static str,
    },

    // Discussion errors
    #[error("no discussion with id '{0}'")]
    DiscussionNotFound(String),

    // Incremental cache errors
    #[error("change log is no longer append-only ({reason}); cached groups were discarded")]
    CacheInvalidated { reason: String },
}

/// Result type alias for backstitch operations
pub type Result<T> = std::result::Result<T, BackstitchError>;

/// A serializable representation of BackstitchError for IPC or UI surfaces
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
}

impl From<&BackstitchError> for SerializableError {
    fn from(err: &BackstitchError) -> Self {
        let kind = match err {
            BackstitchError::Automerge(_) => "Automerge",
            BackstitchError::MissingEntry(_) => "MissingEntry",
            BackstitchError::WrongEntryType { .. } => "WrongEntryType",
            BackstitchError::DiscussionNotFound(_) => "DiscussionNotFound",
            BackstitchError::CacheInvalidated { .. } => "CacheInvalidated",
        }
        .to_string();

        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<BackstitchError> for SerializableError {
    fn from(err: BackstitchError) -> Self {
        SerializableError::from(&err)
    }
}

impl BackstitchError {
    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}
