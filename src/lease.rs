//! Leasing: optimistic lock acquisition and release.
//!
//! There is no lock manager. A worker reads pending documents, adds its lock
//! in memory and writes them back conditionally on the revision it read. The
//! store accepts at most one conditional write per revision, so at most one
//! racing worker ends up holding each document; the others get a conflict
//! for it and drop it from their result.

use std::time::Instant;

use tracing::Instrument;

use crate::error::{Error, Result};
use crate::index::{IndexKind, QueryOptions};
use crate::model::{DocId, Document, Stamp, WorkerId};
use crate::queue::Queue;
use crate::store::DocumentStore;
use crate::telemetry::{metrics, queue::record_items};

/// How [`Queue::remove`] retires a leased document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveOptions {
    /// Strip the annotation instead of marking the document done.
    pub forget: bool,
}

impl RemoveOptions {
    pub fn forget() -> Self {
        Self { forget: true }
    }
}

impl<S: DocumentStore> Queue<S> {
    /// Lock up to `n` pending documents for `worker`.
    ///
    /// Returns `None` when nothing leasable is pending. Otherwise returns the
    /// documents this call actually locked, carrying their new revisions;
    /// candidates lost to concurrent writers are dropped, so the result may
    /// be shorter than `n` and even empty.
    ///
    /// Pending documents whose annotation cannot be decoded are skipped and
    /// the view is paged past them, so they never starve the rest.
    pub async fn lease(&self, worker: &WorkerId, n: usize) -> Result<Option<Vec<Document>>> {
        let span = self.span("lease");
        async {
            let started = Instant::now();
            let stamp = Stamp::now(worker);
            let mut locked = Vec::with_capacity(n);
            let mut offset = 0usize;
            let mut seen = 0usize;
            let mut skipped = 0usize;

            while locked.len() < n {
                let wanted = n - locked.len();
                let options = QueryOptions {
                    limit: Some(wanted),
                    offset,
                    include_docs: true,
                };
                let page = self
                    .read(
                        "query pending",
                        self.store()
                            .query_index(self.design(), IndexKind::Pending, options),
                    )
                    .await?;
                let fetched = page.rows.len();
                seen += fetched;
                offset = offset.saturating_add(fetched);

                for mut doc in page.into_docs() {
                    match self.codec().add_lock(&mut doc, stamp.clone()) {
                        Ok(()) => locked.push(doc),
                        Err(e) => {
                            skipped += 1;
                            tracing::warn!(id = %doc.id, error = %e, "skipping lease candidate");
                        }
                    }
                }
                if fetched < wanted {
                    break;
                }
            }

            if seen == 0 {
                tracing::debug!(worker = %worker, "nothing pending");
                return Ok(None);
            }
            if locked.is_empty() {
                tracing::warn!(worker = %worker, skipped, "no decodable pending documents");
                return Ok(None);
            }

            let batch = self.bulk_write("lease", locked).await?;
            if !batch.rejected.is_empty() {
                tracing::debug!(
                    worker = %worker,
                    lost = batch.rejected.len(),
                    "lease candidates taken by other writers"
                );
                metrics::lease_conflicts()
                    .add(batch.rejected.len() as u64, &[self.queue_label()]);
            }

            metrics::items_leased().add(batch.written.len() as u64, &[self.queue_label()]);
            self.count_op("lease");
            self.record_duration("lease", started);
            record_items(&tracing::Span::current(), batch.written.len());
            tracing::info!(worker = %worker, leased = batch.written.len(), "leased");
            Ok(Some(batch.written))
        }
        .instrument(span)
        .await
    }

    /// Release the lock on a leased document, returning it to pending.
    pub async fn unlease(&self, id: &DocId) -> Result<()> {
        self.unlease_with(id, |_| {}).await
    }

    /// Like [`unlease`](Self::unlease), applying `mutate` to the document
    /// in the same write.
    pub async fn unlease_with<F>(&self, id: &DocId, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Document) + Send,
    {
        let span = self.span("unlease");
        async {
            let mut doc = self.fetch(id).await?;
            if !self.codec().is_locked(&doc)? {
                return Err(Error::NotLocked(id.clone()));
            }
            self.codec().remove_lock(&mut doc)?;
            mutate(&mut doc);
            self.commit("unlease", &mut doc).await?;
            self.count_op("unlease");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Finish a leased document: mark it done, or forget it if
    /// `options.forget` is set.
    ///
    /// Fails with `NotLocked` if the document is not currently leased,
    /// which includes removing the same document twice.
    pub async fn remove(
        &self,
        id: &DocId,
        worker: &WorkerId,
        options: RemoveOptions,
    ) -> Result<()> {
        self.remove_with(id, worker, options, |_| {}).await
    }

    pub async fn remove_with<F>(
        &self,
        id: &DocId,
        worker: &WorkerId,
        options: RemoveOptions,
        mutate: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Document) + Send,
    {
        let span = self.span("remove");
        async {
            let mut doc = self.fetch(id).await?;
            if !self.codec().is_locked(&doc)? {
                return Err(Error::NotLocked(id.clone()));
            }
            self.retire(&mut doc, worker, options)?;
            mutate(&mut doc);
            self.commit("remove", &mut doc).await?;
            self.count_op("remove");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// In-memory half of removal. The caller has checked the lock.
    pub(crate) fn retire(
        &self,
        doc: &mut Document,
        worker: &WorkerId,
        options: RemoveOptions,
    ) -> Result<()> {
        if options.forget {
            self.codec().unpatch(doc);
            return Ok(());
        }
        self.codec().remove_lock(doc)?;
        self.codec().mark_done(doc, Stamp::now(worker))
    }
}
