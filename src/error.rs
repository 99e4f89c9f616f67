//! Error types for hotseat.
//!
//! Single-document operations surface `NotFound`, `Conflict` and `NotLocked`
//! directly. Bulk operations never do; they aggregate per-id failures into a
//! [`BulkReport`](crate::bulk::BulkReport).

use thiserror::Error;

use crate::model::DocId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("document not found: {0}")]
    NotFound(DocId),

    /// An optimistic write lost a race. Re-read and retry.
    #[error("write conflict on document {0}")]
    Conflict(DocId),

    #[error("document {0} is not locked")]
    NotLocked(DocId),

    #[error("document {0} is already locked")]
    AlreadyLocked(DocId),

    #[error("document {0} is already queued")]
    AlreadyQueued(DocId),

    #[error("document {0} is not queued")]
    NotQueued(DocId),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// A write did not answer before the deadline. It may or may not have
    /// been applied; the document must be re-read before any retry.
    #[error("outcome of {0} is unknown after timeout")]
    Indeterminate(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
