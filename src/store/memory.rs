//! In-memory document store for tests and single-process use.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{DeleteOutcome, DocumentStore, Loaded, SaveOutcome, WriteOutcome};
use crate::error::{Error, Result};
use crate::index::{DESIGN_PREFIX, DesignDoc, IndexKind, IndexPage, IndexRow, QueryOptions};
use crate::model::{DocId, Document, Rev};

/// In-memory document store.
///
/// Cloning creates a new handle to the **same** documents, so clones handed
/// to concurrent workers race against each other exactly as separate
/// processes would against a shared server. Every write is checked against
/// the stored revision under one lock, which gives the same single-document
/// compare-and-swap the real stores provide.
#[derive(Clone)]
pub struct MemoryStore {
    name: Arc<str>,
    docs: Arc<Mutex<BTreeMap<DocId, Document>>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            docs: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Number of stored documents, design documents included.
    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.lock().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("hotseat")
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("name", &self.name).finish()
    }
}

/// Compare-and-swap against the stored copy. Returns the new revision, or
/// `None` on conflict.
fn write_one(docs: &mut BTreeMap<DocId, Document>, doc: &Document) -> Option<Rev> {
    let current = docs.get(&doc.id);
    let current_rev = match (current, &doc.rev) {
        (None, None) => None,
        (Some(stored), Some(rev)) if stored.rev.as_ref() == Some(rev) => stored.rev.as_ref(),
        _ => return None,
    };
    let rev = Rev::next(current_rev);
    let mut stored = doc.clone();
    stored.rev = Some(rev.clone());
    docs.insert(doc.id.clone(), stored);
    Some(rev)
}

impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &DocId) -> Result<Option<Document>> {
        Ok(self.docs.lock().await.get(id).cloned())
    }

    async fn bulk_get(&self, ids: &[DocId]) -> Result<Vec<Loaded>> {
        let docs = self.docs.lock().await;
        Ok(ids
            .iter()
            .map(|id| match docs.get(id) {
                Some(doc) => Loaded::Found(doc.clone()),
                None => Loaded::Missing(id.clone()),
            })
            .collect())
    }

    async fn save(&self, doc: &Document) -> Result<SaveOutcome> {
        let mut docs = self.docs.lock().await;
        Ok(match write_one(&mut docs, doc) {
            Some(rev) => SaveOutcome::Saved(rev),
            None => SaveOutcome::Conflict,
        })
    }

    async fn bulk_save(&self, batch: &[Document]) -> Result<Vec<WriteOutcome>> {
        let mut docs = self.docs.lock().await;
        Ok(batch
            .iter()
            .map(|doc| match write_one(&mut docs, doc) {
                Some(rev) => WriteOutcome::Written {
                    id: doc.id.clone(),
                    rev,
                },
                None => WriteOutcome::Conflict { id: doc.id.clone() },
            })
            .collect())
    }

    async fn delete(&self, doc: &Document) -> Result<DeleteOutcome> {
        let mut docs = self.docs.lock().await;
        let Some(stored) = docs.get(&doc.id) else {
            return Ok(DeleteOutcome::NotFound);
        };
        if stored.rev != doc.rev {
            return Ok(DeleteOutcome::Conflict);
        }
        docs.remove(&doc.id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn define_index(&self, design: &DesignDoc) -> Result<()> {
        let mut incoming = design.to_document()?;
        let mut docs = self.docs.lock().await;
        if let Some(stored) = docs.get(&incoming.id) {
            if stored.fields == incoming.fields {
                return Ok(());
            }
            incoming.rev = stored.rev.clone();
        }
        write_one(&mut docs, &incoming);
        Ok(())
    }

    async fn query_index(
        &self,
        design: &DesignDoc,
        kind: IndexKind,
        options: QueryOptions,
    ) -> Result<IndexPage> {
        let docs = self.docs.lock().await;
        let design_id = design.id();
        if !docs.contains_key(&design_id) {
            return Err(Error::NotFound(design_id));
        }

        let spec = design.index(kind);
        let mut matches: Vec<(Option<String>, &Document)> = docs
            .values()
            .filter(|doc| !doc.id.as_str().starts_with(DESIGN_PREFIX))
            .filter(|doc| spec.matches(&design.field, doc))
            .map(|doc| (spec.sort_key(&design.field, doc), doc))
            .collect();
        matches.sort_by(|(ka, a), (kb, b)| ka.cmp(kb).then_with(|| a.id.cmp(&b.id)));

        let total = matches.len() as u64;
        let rows = matches
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .map(|(key, doc)| IndexRow {
                id: doc.id.clone(),
                key,
                doc: options.include_docs.then(|| doc.clone()),
            })
            .collect();
        Ok(IndexPage { total, rows })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use serde_json::json;

    fn doc(id: &str) -> Document {
        Document::new(id).with_field("field", "value")
    }

    #[tokio::test]
    async fn create_then_update_with_current_rev() {
        let store = MemoryStore::default();
        let SaveOutcome::Saved(rev) = store.save(&doc("a")).await.unwrap() else {
            panic!("expected Saved");
        };
        assert_eq!(rev.generation(), 1);

        let mut stored = store.get(&"a".into()).await.unwrap().unwrap();
        stored.fields.insert("field".to_string(), json!("changed"));
        let SaveOutcome::Saved(rev2) = store.save(&stored).await.unwrap() else {
            panic!("expected Saved");
        };
        assert_eq!(rev2.generation(), 2);
    }

    #[tokio::test]
    async fn create_over_existing_conflicts() {
        let store = MemoryStore::default();
        store.save(&doc("a")).await.unwrap();
        assert_eq!(store.save(&doc("a")).await.unwrap(), SaveOutcome::Conflict);
    }

    #[tokio::test]
    async fn stale_rev_conflicts() {
        let store = MemoryStore::default();
        store.save(&doc("a")).await.unwrap();
        let stale = store.get(&"a".into()).await.unwrap().unwrap();
        assert!(matches!(
            store.save(&stale).await.unwrap(),
            SaveOutcome::Saved(_)
        ));
        assert_eq!(store.save(&stale).await.unwrap(), SaveOutcome::Conflict);
    }

    #[tokio::test]
    async fn bulk_save_is_per_document() {
        let store = MemoryStore::default();
        store.save(&doc("a")).await.unwrap();
        let outcomes = store.bulk_save(&[doc("a"), doc("b")]).await.unwrap();
        assert!(matches!(outcomes[0], WriteOutcome::Conflict { .. }));
        assert!(matches!(outcomes[1], WriteOutcome::Written { .. }));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn bulk_get_marks_missing() {
        let store = MemoryStore::default();
        store.save(&doc("a")).await.unwrap();
        let loaded = store
            .bulk_get(&[DocId::from("a"), DocId::from("nope")])
            .await
            .unwrap();
        assert!(matches!(&loaded[0], Loaded::Found(d) if d.id.as_str() == "a"));
        assert_eq!(loaded[1], Loaded::Missing("nope".into()));
    }

    #[tokio::test]
    async fn delete_checks_rev() {
        let store = MemoryStore::default();
        store.save(&doc("a")).await.unwrap();
        assert_eq!(store.delete(&doc("a")).await.unwrap(), DeleteOutcome::Conflict);
        let stored = store.get(&"a".into()).await.unwrap().unwrap();
        assert_eq!(store.delete(&stored).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete(&stored).await.unwrap(), DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn query_requires_defined_design() {
        let store = MemoryStore::default();
        let design = DesignDoc::from_config(&QueueConfig::default());
        let err = store
            .query_index(&design, IndexKind::All, QueryOptions::count_only())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(id) if id == design.id()));
    }

    #[tokio::test]
    async fn define_index_is_idempotent() {
        let store = MemoryStore::default();
        let design = DesignDoc::from_config(&QueueConfig::default());
        store.define_index(&design).await.unwrap();
        let first = store.get(&design.id()).await.unwrap().unwrap();
        store.define_index(&design).await.unwrap();
        let second = store.get(&design.id()).await.unwrap().unwrap();
        assert_eq!(first.rev, second.rev);
    }

    #[tokio::test]
    async fn query_orders_by_key_then_id_and_pages() {
        let store = MemoryStore::default();
        let design = DesignDoc::from_config(&QueueConfig::default());
        store.define_index(&design).await.unwrap();
        for (id, at) in [("c", "2024-01-01"), ("a", "2024-01-02"), ("b", "2024-01-01")] {
            let d = Document::new(id).with_field("hotseat", json!({"at": at, "by": "w"}));
            store.save(&d).await.unwrap();
        }
        store.save(&doc("plain")).await.unwrap();

        let page = store
            .query_index(&design, IndexKind::Pending, QueryOptions::all_docs())
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(
            page.ids(),
            vec![DocId::from("b"), DocId::from("c"), DocId::from("a")]
        );

        let page = store
            .query_index(
                &design,
                IndexKind::Pending,
                QueryOptions {
                    limit: Some(1),
                    offset: 1,
                    include_docs: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.ids(), vec![DocId::from("c")]);
        assert!(page.rows[0].doc.is_none());
    }
}
