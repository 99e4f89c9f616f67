//! Concurrent lease races: no document is ever leased twice.

use std::collections::HashSet;
use std::sync::Arc;

use hotseat::index::{DesignDoc, IndexKind, IndexPage, QueryOptions};
use hotseat::model::Document;
use hotseat::store::{DeleteOutcome, Loaded, SaveOutcome, WriteOutcome};
use hotseat::{DocId, DocumentStore, MemoryStore, Queue, QueueConfig, Result, WorkerId};
use tokio::sync::Barrier;

async fn seeded_queue<S: DocumentStore>(store: S, inner: &MemoryStore, n: usize) -> Queue<S> {
    let ids: Vec<DocId> = (0..n).map(|i| DocId::new(format!("job-{i:03}"))).collect();
    for id in &ids {
        inner.save(&Document::new(id.clone())).await.unwrap();
    }
    let queue = Queue::open(store, QueueConfig::default()).await.unwrap();
    let report = queue
        .enqueue_bulk(&ids, &WorkerId::new("producer"))
        .await
        .unwrap();
    assert_eq!(report.processed.len(), n);
    queue
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_workers_never_share_a_document() {
    let store = MemoryStore::new("race");
    let queue = seeded_queue(store.clone(), &store, 40).await;

    let mut handles = Vec::new();
    for w in 0..8 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let worker = WorkerId::new(format!("worker-{w}"));
            let mut mine = Vec::new();
            while let Some(leased) = queue.lease(&worker, 3).await.unwrap() {
                for doc in leased {
                    let state = queue.state_of(&doc.id).await.unwrap();
                    assert!(state.is_locked(), "{} should be locked", doc.id);
                    mine.push(doc.id);
                }
                tokio::task::yield_now().await;
            }
            mine
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id.clone()), "{id} leased twice");
        }
    }
    assert_eq!(seen.len(), 40);
    assert_eq!(queue.num_locked().await.unwrap(), 40);
    assert_eq!(queue.num_pending().await.unwrap(), 0);
}

/// Store that holds every batched write until `parties` writers have
/// arrived, so all racing leases read the same candidates first.
#[derive(Clone)]
struct GatedStore {
    inner: MemoryStore,
    gate: Arc<Barrier>,
}

impl DocumentStore for GatedStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, id: &DocId) -> Result<Option<Document>> {
        self.inner.get(id).await
    }

    async fn bulk_get(&self, ids: &[DocId]) -> Result<Vec<Loaded>> {
        self.inner.bulk_get(ids).await
    }

    async fn save(&self, doc: &Document) -> Result<SaveOutcome> {
        self.inner.save(doc).await
    }

    async fn bulk_save(&self, docs: &[Document]) -> Result<Vec<WriteOutcome>> {
        self.gate.wait().await;
        self.inner.bulk_save(docs).await
    }

    async fn delete(&self, doc: &Document) -> Result<DeleteOutcome> {
        self.inner.delete(doc).await
    }

    async fn define_index(&self, design: &DesignDoc) -> Result<()> {
        self.inner.define_index(design).await
    }

    async fn query_index(
        &self,
        design: &DesignDoc,
        kind: IndexKind,
        options: QueryOptions,
    ) -> Result<IndexPage> {
        self.inner.query_index(design, kind, options).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loser_of_a_full_collision_gets_an_empty_lease() {
    let inner = MemoryStore::new("gated");
    let producer = seeded_queue(inner.clone(), &inner, 3).await;
    let gated = GatedStore {
        inner: inner.clone(),
        gate: Arc::new(Barrier::new(2)),
    };
    let queue = Queue::open(gated, QueueConfig::default()).await.unwrap();

    let a = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.lease(&WorkerId::new("a"), 3).await })
    };
    let b = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.lease(&WorkerId::new("b"), 3).await })
    };
    let a = a.await.unwrap().unwrap().expect("items were pending");
    let b = b.await.unwrap().unwrap().expect("items were pending");

    let (winner, loser) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    assert_eq!(winner.len(), 3);
    assert!(loser.is_empty());
    assert_eq!(producer.num_locked().await.unwrap(), 3);
    assert_eq!(producer.num_pending().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partial_overlap_splits_documents_between_workers() {
    let inner = MemoryStore::new("overlap");
    let producer = seeded_queue(inner.clone(), &inner, 4).await;
    let gated = GatedStore {
        inner: inner.clone(),
        gate: Arc::new(Barrier::new(2)),
    };
    let queue = Queue::open(gated, QueueConfig::default()).await.unwrap();

    // Both read the two oldest before either writes; one of them also
    // reads the next two.
    let narrow = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.lease(&WorkerId::new("narrow"), 2).await })
    };
    let wide = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.lease(&WorkerId::new("wide"), 4).await })
    };
    let narrow = narrow.await.unwrap().unwrap().unwrap();
    let wide = wide.await.unwrap().unwrap().unwrap();

    let mut all: Vec<DocId> = narrow.iter().chain(&wide).map(|d| d.id.clone()).collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), narrow.len() + wide.len());
    assert!(wide.len() >= 2);
    assert_eq!(producer.num_locked().await.unwrap(), all.len() as u64);
}
