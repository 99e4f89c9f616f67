//! The document store the queue lives in.
//!
//! The store owns durability, revisions and view computation. The queue only
//! needs single-document compare-and-swap writes, a batched form of them
//! that may partially succeed, and count/page queries over the views in a
//! [`DesignDoc`].
//!
//! - [`DocumentStore`] - the contract
//! - [`MemoryStore`] - in-process store for tests and embedding
//! - [`PgStore`](crate::db::PgStore) - Postgres JSONB store

use std::future::Future;

use crate::error::Result;
use crate::index::{DesignDoc, IndexKind, IndexPage, QueryOptions};
use crate::model::{DocId, Document, Rev};

mod memory;

pub use memory::MemoryStore;

/// Names starting with this prefix belong to the store itself.
pub const SYSTEM_PREFIX: char = '_';

/// Outcome of a single conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written; the document now carries this revision.
    Saved(Rev),
    /// The stored revision no longer matches the one the caller read.
    Conflict,
}

/// Per-document outcome of a batched write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { id: DocId, rev: Rev },
    Conflict { id: DocId },
    Failed { id: DocId, reason: String },
}

impl WriteOutcome {
    pub fn id(&self) -> &DocId {
        match self {
            WriteOutcome::Written { id, .. }
            | WriteOutcome::Conflict { id }
            | WriteOutcome::Failed { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Conflict,
    NotFound,
}

/// Per-id result of a batched read.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    Found(Document),
    Missing(DocId),
}

impl Loaded {
    pub fn id(&self) -> &DocId {
        match self {
            Loaded::Found(doc) => &doc.id,
            Loaded::Missing(id) => id,
        }
    }
}

/// Contract for document store backends.
///
/// Writes are compare-and-swap on the document revision: a document with
/// `rev == None` is created only if no document with its id exists; one with
/// `rev == Some(r)` replaces the stored document only if the stored revision
/// is still `r`. Anything else is a conflict, never an error.
pub trait DocumentStore: Clone + Send + Sync + 'static {
    /// Database name.
    fn name(&self) -> &str;

    fn get(&self, id: &DocId) -> impl Future<Output = Result<Option<Document>>> + Send;

    /// One entry per requested id, in request order. Never fails because of
    /// an individual missing id.
    fn bulk_get(&self, ids: &[DocId]) -> impl Future<Output = Result<Vec<Loaded>>> + Send;

    fn save(&self, doc: &Document) -> impl Future<Output = Result<SaveOutcome>> + Send;

    /// One outcome per document, in input order. Not atomic across the
    /// batch; each document succeeds or conflicts on its own.
    fn bulk_save(
        &self,
        docs: &[Document],
    ) -> impl Future<Output = Result<Vec<WriteOutcome>>> + Send;

    fn delete(&self, doc: &Document) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    /// Register the design's views. Idempotent.
    fn define_index(&self, design: &DesignDoc) -> impl Future<Output = Result<()>> + Send;

    /// Rows of one view ordered by sort key, then id.
    fn query_index(
        &self,
        design: &DesignDoc,
        kind: IndexKind,
        options: QueryOptions,
    ) -> impl Future<Output = Result<IndexPage>> + Send;
}
