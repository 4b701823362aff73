use std::fmt;
use thiserror::Error as ThisError;

/// Which entity collection an operation targeted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionKind {
    Facilities,
    Documents,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKind::Facilities => write!(f, "facility"),
            CollectionKind::Documents => write!(f, "document"),
        }
    }
}

/// Failures surfaced by the dashboard core.
///
/// Storage and network failures are normally caught at the component that
/// issued the operation and recorded as a user-visible error flag; they only
/// reach callers when the operation itself could not be confirmed.
#[derive(Debug, ThisError)]
pub enum DashboardError {
    /// A mutation targeted an id that is not in the collection.
    #[error("{collection} not found: {id}")]
    NotFound {
        collection: CollectionKind,
        id: String,
    },

    /// Durable storage could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Remote object storage rejected or failed an upload.
    #[error("upload failed: {0}")]
    RemoteUpload(String),

    /// Rejected input: credentials, contradictory flags, duplicate ids.
    #[error("{0}")]
    Validation(String),

    /// A read endpoint could not be reached or answered with an error.
    #[error("network error: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DashboardError {
    pub fn not_found(collection: CollectionKind, id: impl fmt::Display) -> Self {
        DashboardError::NotFound {
            collection,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DashboardError::NotFound { .. })
    }
}

pub type DashboardResult<T> = Result<T, DashboardError>;
