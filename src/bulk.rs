//! Batched queue operations.
//!
//! Each operation loads its documents in one read, transforms them in
//! memory and writes them back in one batch. Nothing here fails because of a
//! single id: ids that cannot be processed are collected in the returned
//! [`BulkReport`] instead.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::index::{IndexKind, QueryOptions};
use crate::lease::RemoveOptions;
use crate::model::{DocId, Document, Stamp, WorkerId};
use crate::queue::Queue;
use crate::store::{DocumentStore, Loaded, WriteOutcome};
use crate::telemetry::{metrics, queue::record_items};

/// Why a bulk operation left an id alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkErrorReason {
    /// No document with this id.
    Missing,
    /// Not currently leased.
    Unlocked,
    /// Already carries this queue's annotation.
    Queued,
    /// Changed by another writer between read and write.
    Conflict,
    /// The store rejected the write, or the annotation could not be read.
    Failed(String),
}

impl BulkErrorReason {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BulkErrorReason::Missing => "missing",
            BulkErrorReason::Unlocked => "unlocked",
            BulkErrorReason::Queued => "queued",
            BulkErrorReason::Conflict => "conflict",
            BulkErrorReason::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for BulkErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkErrorReason::Failed(reason) => f.write_str(reason),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkError {
    pub id: DocId,
    pub reason: BulkErrorReason,
}

impl BulkError {
    pub fn new(id: DocId, reason: BulkErrorReason) -> Self {
        Self { id, reason }
    }
}

/// Per-id outcome of a bulk operation.
///
/// `processed` holds the ids whose write went through. `errors` is ordered
/// by the position of each id in the caller's input. Ids in neither list
/// were skipped silently (see the individual operations).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkReport {
    pub processed: Vec<DocId>,
    pub errors: Vec<BulkError>,
}

impl BulkReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_ids(&self) -> Vec<DocId> {
        self.errors.iter().map(|e| e.id.clone()).collect()
    }
}

/// Result of one batched write, reconciled against its input.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    /// Documents written, carrying their new revisions.
    pub written: Vec<Document>,
    pub rejected: Vec<BulkError>,
}

/// Match store outcomes to the documents that produced them.
fn reconcile(docs: Vec<Document>, outcomes: Vec<WriteOutcome>) -> Result<Batch> {
    if docs.len() != outcomes.len() {
        return Err(Error::Other(format!(
            "bulk write returned {} outcomes for {} documents",
            outcomes.len(),
            docs.len()
        )));
    }
    let mut batch = Batch::default();
    for (mut doc, outcome) in docs.into_iter().zip(outcomes) {
        if outcome.id() != &doc.id {
            return Err(Error::Other(format!(
                "bulk write outcome for {} does not match document {}",
                outcome.id(),
                doc.id
            )));
        }
        match outcome {
            WriteOutcome::Written { rev, .. } => {
                doc.rev = Some(rev);
                batch.written.push(doc);
            }
            WriteOutcome::Conflict { id } => {
                batch.rejected.push(BulkError::new(id, BulkErrorReason::Conflict))
            }
            WriteOutcome::Failed { id, reason } => {
                batch.rejected.push(BulkError::new(id, BulkErrorReason::Failed(reason)))
            }
        }
    }
    Ok(batch)
}

/// First occurrence of each id, in input order.
fn distinct(ids: &[DocId]) -> Vec<DocId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}

fn sort_by_input(ids: &[DocId], errors: &mut [BulkError]) {
    let position: HashMap<&DocId, usize> =
        ids.iter().enumerate().rev().map(|(i, id)| (id, i)).collect();
    errors.sort_by_key(|e| position.get(&e.id).copied().unwrap_or(usize::MAX));
}

impl<S: DocumentStore> Queue<S> {
    /// Enqueue every listed document. Missing ids are skipped; documents
    /// already in the queue are reported as `queued`.
    pub async fn enqueue_bulk(&self, ids: &[DocId], worker: &WorkerId) -> Result<BulkReport> {
        let span = self.span("enqueue_bulk");
        async {
            let started = Instant::now();
            let ids = distinct(ids);
            let stamp = Stamp::now(worker);
            let mut batch = Vec::with_capacity(ids.len());
            let mut errors = Vec::new();

            for entry in self.bulk_load(&ids).await? {
                let mut doc = match entry {
                    Loaded::Found(doc) => doc,
                    Loaded::Missing(id) => {
                        tracing::debug!(%id, "enqueue_bulk: skipping missing document");
                        continue;
                    }
                };
                match self.codec().patch(&mut doc, stamp.clone()) {
                    Ok(()) => batch.push(doc),
                    Err(Error::AlreadyQueued(id)) => {
                        errors.push(BulkError::new(id, BulkErrorReason::Queued))
                    }
                    Err(e) => errors.push(BulkError::new(
                        doc.id.clone(),
                        BulkErrorReason::Failed(e.to_string()),
                    )),
                }
            }

            self.finish("enqueue_bulk", &ids, batch, errors, started)
                .await
        }
        .instrument(span)
        .await
    }

    /// Retire every listed document that is currently leased.
    ///
    /// Locked documents are marked done (or forgotten with
    /// `options.forget`). Unlocked and missing ids are reported as
    /// `unlocked` and `missing` and left untouched.
    pub async fn remove_bulk(
        &self,
        ids: &[DocId],
        worker: &WorkerId,
        options: RemoveOptions,
    ) -> Result<BulkReport> {
        let span = self.span("remove_bulk");
        async {
            let started = Instant::now();
            let ids = distinct(ids);
            let mut batch = Vec::with_capacity(ids.len());
            let mut errors = Vec::new();

            for entry in self.bulk_load(&ids).await? {
                let mut doc = match entry {
                    Loaded::Found(doc) => doc,
                    Loaded::Missing(id) => {
                        errors.push(BulkError::new(id, BulkErrorReason::Missing));
                        continue;
                    }
                };
                let retired = match self.codec().is_locked(&doc) {
                    Ok(true) => self.retire(&mut doc, worker, options),
                    Ok(false) => {
                        errors.push(BulkError::new(doc.id, BulkErrorReason::Unlocked));
                        continue;
                    }
                    Err(e) => Err(e),
                };
                match retired {
                    Ok(()) => batch.push(doc),
                    Err(e) => errors.push(BulkError::new(
                        doc.id,
                        BulkErrorReason::Failed(e.to_string()),
                    )),
                }
            }

            self.finish("remove_bulk", &ids, batch, errors, started)
                .await
        }
        .instrument(span)
        .await
    }

    /// Strip the annotation from every listed document, whatever its state.
    /// Missing and unannotated documents are skipped.
    pub async fn forget_bulk(&self, ids: &[DocId]) -> Result<BulkReport> {
        let span = self.span("forget_bulk");
        async {
            let started = Instant::now();
            let ids = distinct(ids);
            let docs = self
                .bulk_load(&ids)
                .await?
                .into_iter()
                .filter_map(|entry| match entry {
                    Loaded::Found(doc) => Some(doc),
                    Loaded::Missing(id) => {
                        tracing::debug!(%id, "forget_bulk: skipping missing document");
                        None
                    }
                });
            let batch = self.strip(docs);
            self.finish("forget_bulk", &ids, batch, Vec::new(), started)
                .await
        }
        .instrument(span)
        .await
    }

    /// Forget every document in the queue.
    pub async fn purge(&self) -> Result<BulkReport> {
        let span = self.span("purge");
        async {
            let started = Instant::now();
            let page = self
                .read(
                    "query all",
                    self.store()
                        .query_index(self.design(), IndexKind::All, QueryOptions::all_docs()),
                )
                .await?;
            let ids = page.ids();
            let batch = self.strip(page.into_docs());
            self.finish("purge", &ids, batch, Vec::new(), started)
                .await
        }
        .instrument(span)
        .await
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    /// Load documents by id. One entry per id, in order.
    pub(crate) async fn bulk_load(&self, ids: &[DocId]) -> Result<Vec<Loaded>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.read("bulk_get", self.store().bulk_get(ids)).await
    }

    /// Write documents in one batch and reconcile the outcomes.
    pub(crate) async fn bulk_write(&self, op: &'static str, docs: Vec<Document>) -> Result<Batch> {
        if docs.is_empty() {
            return Ok(Batch::default());
        }
        let outcomes = self.write(op, self.store().bulk_save(&docs)).await?;
        reconcile(docs, outcomes)
    }

    fn strip(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        docs.into_iter()
            .filter_map(|mut doc| self.codec().unpatch(&mut doc).then_some(doc))
            .collect()
    }

    async fn finish(
        &self,
        op: &'static str,
        ids: &[DocId],
        docs: Vec<Document>,
        mut errors: Vec<BulkError>,
        started: Instant,
    ) -> Result<BulkReport> {
        let batch = self.bulk_write(op, docs).await?;
        errors.extend(batch.rejected);
        sort_by_input(ids, &mut errors);

        let counter = metrics::bulk_errors();
        for error in &errors {
            tracing::debug!(id = %error.id, reason = %error.reason, op, "bulk item not processed");
            counter.add(
                1,
                &[self.queue_label(), KeyValue::new("reason", error.reason.label())],
            );
        }

        let processed: Vec<DocId> = batch.written.into_iter().map(|doc| doc.id).collect();
        record_items(&tracing::Span::current(), processed.len());
        self.count_op(op);
        self.record_duration(op, started);
        tracing::info!(op, processed = processed.len(), errors = errors.len(), "bulk operation finished");
        Ok(BulkReport { processed, errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rev;

    fn ids(raw: &[&str]) -> Vec<DocId> {
        raw.iter().map(|s| DocId::from(*s)).collect()
    }

    #[test]
    fn distinct_keeps_first_occurrence_order() {
        assert_eq!(distinct(&ids(&["b", "a", "b", "c", "a"])), ids(&["b", "a", "c"]));
    }

    #[test]
    fn errors_follow_input_order() {
        let input = ids(&["c", "a", "b"]);
        let mut errors = vec![
            BulkError::new(DocId::from("a"), BulkErrorReason::Missing),
            BulkError::new(DocId::from("b"), BulkErrorReason::Conflict),
            BulkError::new(DocId::from("c"), BulkErrorReason::Unlocked),
        ];
        sort_by_input(&input, &mut errors);
        let order: Vec<&str> = errors.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn reconcile_splits_outcomes() {
        let docs = vec![Document::new("a"), Document::new("b"), Document::new("c")];
        let rev = Rev::next(None);
        let outcomes = vec![
            WriteOutcome::Written {
                id: DocId::from("a"),
                rev: rev.clone(),
            },
            WriteOutcome::Conflict {
                id: DocId::from("b"),
            },
            WriteOutcome::Failed {
                id: DocId::from("c"),
                reason: "disk full".into(),
            },
        ];
        let batch = reconcile(docs, outcomes).unwrap();
        assert_eq!(batch.written.len(), 1);
        assert_eq!(batch.written[0].rev, Some(rev));
        assert_eq!(
            batch.rejected,
            vec![
                BulkError::new(DocId::from("b"), BulkErrorReason::Conflict),
                BulkError::new(DocId::from("c"), BulkErrorReason::Failed("disk full".into())),
            ]
        );
    }

    #[test]
    fn reconcile_rejects_mismatched_outcomes() {
        let docs = vec![Document::new("a")];
        let outcomes = vec![WriteOutcome::Conflict {
            id: DocId::from("z"),
        }];
        assert!(matches!(reconcile(docs, outcomes), Err(Error::Other(_))));
        assert!(matches!(reconcile(vec![Document::new("a")], vec![]), Err(Error::Other(_))));
    }

    #[test]
    fn reasons_display_as_labels() {
        assert_eq!(BulkErrorReason::Missing.to_string(), "missing");
        assert_eq!(BulkErrorReason::Unlocked.to_string(), "unlocked");
        assert_eq!(BulkErrorReason::Queued.to_string(), "queued");
        assert_eq!(BulkErrorReason::Failed("boom".into()).to_string(), "boom");
        assert_eq!(BulkErrorReason::Failed("boom".into()).label(), "failed");
    }
}
