//! The queue facade.
//!
//! A [`Queue`] is a view over a [`DocumentStore`] defined by a
//! [`QueueConfig`]: documents annotated under the configured field are its
//! items, and the four views of its design document count and list them.
//! Lease and removal live in [`crate::lease`], batched operations in
//! [`crate::bulk`].

use std::future::Future;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::Instrument;

use crate::codec::Codec;
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::index::{DesignDoc, IndexKind, QueryOptions};
use crate::model::{DocId, Document, QueueState, Stamp, WorkerId};
use crate::store::{DocumentStore, SYSTEM_PREFIX, SaveOutcome};
use crate::telemetry::{metrics, queue::start_op_span};

/// Handle to one queue on one store. Cheap to clone if the store is.
#[derive(Debug, Clone)]
pub struct Queue<S> {
    store: S,
    config: QueueConfig,
    codec: Codec,
    design: DesignDoc,
}

impl<S: DocumentStore> Queue<S> {
    /// Open the queue, registering its views if the store does not have
    /// them yet.
    pub async fn open(store: S, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        if store.name().starts_with(SYSTEM_PREFIX) {
            return Err(Error::Config(format!(
                "{} is a system database and cannot hold a queue",
                store.name()
            )));
        }
        let queue = Self {
            codec: Codec::new(&config.field),
            design: DesignDoc::from_config(&config),
            store,
            config,
        };
        if !Self::is_queue(&queue.store, &queue.config).await? {
            queue
                .write("define_index", queue.store.define_index(&queue.design))
                .await?;
            tracing::info!(
                db = queue.store.name(),
                design = %queue.design.name,
                "created queue"
            );
        }
        Ok(queue)
    }

    /// Whether `store` holds the queue described by `config`: it is not a
    /// system database and its design document exists.
    pub async fn is_queue(store: &S, config: &QueueConfig) -> Result<bool> {
        if store.name().starts_with(SYSTEM_PREFIX) {
            return Ok(false);
        }
        let id = crate::index::design_doc_id(&config.design_doc);
        Ok(store.get(&id).await?.is_some())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn design(&self) -> &DesignDoc {
        &self.design
    }

    // -----------------------------------------------------------------------
    // Single documents
    // -----------------------------------------------------------------------

    /// Add a document to the queue as pending.
    ///
    /// Fails with `NotFound` if the document does not exist, `AlreadyQueued`
    /// if it already carries this queue's annotation, and `Conflict` if it
    /// changed between read and write.
    pub async fn enqueue(&self, id: &DocId, worker: &WorkerId) -> Result<Document> {
        let span = self.span("enqueue");
        async {
            let mut doc = self.fetch(id).await?;
            self.codec.patch(&mut doc, Stamp::now(worker))?;
            self.commit("enqueue", &mut doc).await?;
            self.count_op("enqueue");
            Ok(doc)
        }
        .instrument(span)
        .await
    }

    /// Strip the annotation whatever its state. A document that is not
    /// queued is left untouched.
    pub async fn forget(&self, id: &DocId) -> Result<()> {
        let span = self.span("forget");
        async {
            let mut doc = self.fetch(id).await?;
            if !self.codec.unpatch(&mut doc) {
                tracing::debug!(%id, "forget: document is not queued");
                return Ok(());
            }
            self.commit("forget", &mut doc).await?;
            self.count_op("forget");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Queue state of one document.
    pub async fn state_of(&self, id: &DocId) -> Result<QueueState> {
        let doc = self.fetch(id).await?;
        self.codec.state(&doc)
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Peek at up to `limit` pending documents, oldest first, without
    /// locking them. `None` if nothing is pending.
    pub async fn get(&self, limit: usize) -> Result<Option<Vec<Document>>> {
        let page = self
            .read(
                "query pending",
                self.store
                    .query_index(&self.design, IndexKind::Pending, QueryOptions::docs(limit)),
            )
            .await?;
        let docs = page.into_docs();
        Ok((!docs.is_empty()).then_some(docs))
    }

    pub async fn count(&self, kind: IndexKind) -> Result<u64> {
        let page = self
            .read(
                "count",
                self.store
                    .query_index(&self.design, kind, QueryOptions::count_only()),
            )
            .await?;
        Ok(page.total)
    }

    pub async fn num_pending(&self) -> Result<u64> {
        self.count(IndexKind::Pending).await
    }

    pub async fn num_locked(&self) -> Result<u64> {
        self.count(IndexKind::Locked).await
    }

    pub async fn num_done(&self) -> Result<u64> {
        self.count(IndexKind::Done).await
    }

    pub async fn num_all(&self) -> Result<u64> {
        self.count(IndexKind::All).await
    }

    // -----------------------------------------------------------------------
    // Store access
    // -----------------------------------------------------------------------

    /// Run a read under the configured deadline.
    pub(crate) async fn read<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout(op))?,
            None => fut.await,
        }
    }

    /// Run a write under the configured deadline. A write that times out
    /// may still have been applied, so it is reported as indeterminate
    /// rather than as a failure.
    pub(crate) async fn write<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                tracing::warn!(op, "write timed out; outcome unknown");
                Error::Indeterminate(op)
            })?,
            None => fut.await,
        }
    }

    pub(crate) async fn fetch(&self, id: &DocId) -> Result<Document> {
        self.read("get", self.store.get(id))
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Conditional write of one document; refreshes its revision on success.
    pub(crate) async fn commit(&self, op: &'static str, doc: &mut Document) -> Result<()> {
        match self.write(op, self.store.save(doc)).await? {
            SaveOutcome::Saved(rev) => {
                doc.rev = Some(rev);
                Ok(())
            }
            SaveOutcome::Conflict => {
                tracing::debug!(id = %doc.id, op, "write conflict");
                Err(Error::Conflict(doc.id.clone()))
            }
        }
    }

    pub(crate) fn span(&self, operation: &'static str) -> tracing::Span {
        start_op_span(operation, &self.design.name, self.store.name())
    }

    pub(crate) fn count_op(&self, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.design.name.clone()),
                KeyValue::new("operation", operation),
            ],
        );
    }

    pub(crate) fn queue_label(&self) -> KeyValue {
        KeyValue::new("queue", self.design.name.clone())
    }

    pub(crate) fn record_duration(&self, operation: &'static str, started: Instant) {
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", operation)],
        );
    }
}
