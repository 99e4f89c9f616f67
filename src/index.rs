//! Declarative definitions of the four derived views over annotated
//! documents.
//!
//! A view is a conjunction of presence clauses over parts of the annotation
//! plus a sort key. The definitions are store-agnostic: the in-process store
//! evaluates them directly and the Postgres store compiles them to SQL.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::QueueConfig;
use crate::error::Result;
use crate::model::{DocId, Document};

/// Prefix of design document ids.
pub const DESIGN_PREFIX: &str = "_design/";

// ---------------------------------------------------------------------------
// Clauses
// ---------------------------------------------------------------------------

/// A part of the annotation a clause can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    /// The annotation object itself.
    Annotation,
    Lock,
    Done,
}

impl Part {
    /// Path below the annotation field.
    pub fn path(self) -> &'static [&'static str] {
        match self {
            Part::Annotation => &[],
            Part::Lock => &["lock"],
            Part::Done => &["done"],
        }
    }

    /// Look the part up on a raw document. JSON `null` counts as absent.
    pub fn lookup<'a>(self, field: &str, doc: &'a Document) -> Option<&'a Value> {
        let mut value = doc.get(field)?;
        for key in self.path() {
            value = value.get(key)?;
        }
        (!value.is_null()).then_some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "part", rename_all = "snake_case")]
pub enum Clause {
    Present(Part),
    Absent(Part),
}

impl Clause {
    pub fn holds(self, field: &str, doc: &Document) -> bool {
        match self {
            Clause::Present(part) => part.lookup(field, doc).is_some(),
            Clause::Absent(part) => part.lookup(field, doc).is_none(),
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Pending,
    Locked,
    Done,
    All,
}

impl IndexKind {
    pub const KINDS: [IndexKind; 4] = [
        IndexKind::Pending,
        IndexKind::Locked,
        IndexKind::Done,
        IndexKind::All,
    ];

    fn position(self) -> usize {
        match self {
            IndexKind::Pending => 0,
            IndexKind::Locked => 1,
            IndexKind::Done => 2,
            IndexKind::All => 3,
        }
    }

    /// Clauses that define membership. `locked` excludes done items so that
    /// every annotated document sits in exactly one of pending, locked, done.
    pub fn clauses(self) -> Vec<Clause> {
        use Clause::*;
        match self {
            IndexKind::Pending => vec![
                Present(Part::Annotation),
                Absent(Part::Lock),
                Absent(Part::Done),
            ],
            IndexKind::Locked => vec![
                Present(Part::Annotation),
                Present(Part::Lock),
                Absent(Part::Done),
            ],
            IndexKind::Done => vec![Present(Part::Annotation), Present(Part::Done)],
            IndexKind::All => vec![Present(Part::Annotation)],
        }
    }

    /// Whose `at` timestamp orders the view.
    pub fn sort_part(self) -> Part {
        match self {
            IndexKind::Pending | IndexKind::All => Part::Annotation,
            IndexKind::Locked => Part::Lock,
            IndexKind::Done => Part::Done,
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IndexKind::Pending => "pending",
            IndexKind::Locked => "locked",
            IndexKind::Done => "done",
            IndexKind::All => "all",
        };
        write!(f, "{s}")
    }
}

/// One named view: membership clauses and a sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub kind: IndexKind,
    pub clauses: Vec<Clause>,
    pub sort_key: Part,
}

impl IndexSpec {
    pub fn new(kind: IndexKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            clauses: kind.clauses(),
            sort_key: kind.sort_part(),
        }
    }

    pub fn matches(&self, field: &str, doc: &Document) -> bool {
        self.clauses.iter().all(|c| c.holds(field, doc))
    }

    /// The `at` string of the sort part, if present.
    pub fn sort_key(&self, field: &str, doc: &Document) -> Option<String> {
        self.sort_key
            .lookup(field, doc)?
            .get("at")?
            .as_str()
            .map(str::to_string)
    }
}

/// The set of views belonging to one queue, registered with the store as a
/// single resource under `_design/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignDoc {
    pub name: String,
    /// Annotation field the views read.
    pub field: String,
    /// Ordered as [`IndexKind::KINDS`].
    pub indexes: [IndexSpec; 4],
}

impl DesignDoc {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            name: config.design_doc.clone(),
            field: config.field.clone(),
            indexes: [
                IndexSpec::new(IndexKind::Pending, &config.pending_view),
                IndexSpec::new(IndexKind::Locked, &config.locked_view),
                IndexSpec::new(IndexKind::Done, &config.done_view),
                IndexSpec::new(IndexKind::All, &config.all_view),
            ],
        }
    }

    /// Well-known id of the design resource; its existence marks a queue.
    pub fn id(&self) -> DocId {
        design_doc_id(&self.name)
    }

    pub fn index(&self, kind: IndexKind) -> &IndexSpec {
        &self.indexes[kind.position()]
    }

    /// `"<design>/<view>"`, the name a view is queried by.
    pub fn view_name(&self, kind: IndexKind) -> String {
        format!("{}/{}", self.name, self.index(kind).name)
    }

    /// Store representation, as kept under [`DesignDoc::id`].
    pub fn to_document(&self) -> Result<Document> {
        let mut doc = Document::new(self.id());
        doc.fields
            .insert("hotseat_design".to_string(), serde_json::to_value(self)?);
        Ok(doc)
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let raw = doc.get("hotseat_design").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(raw)?)
    }
}

pub fn design_doc_id(name: &str) -> DocId {
    DocId(format!("{DESIGN_PREFIX}{name}"))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// `None` returns every match.
    pub limit: Option<usize>,
    pub offset: usize,
    pub include_docs: bool,
}

impl QueryOptions {
    /// Cardinality only; no rows.
    pub fn count_only() -> Self {
        Self {
            limit: Some(0),
            ..Self::default()
        }
    }

    /// Up to `limit` rows with documents.
    pub fn docs(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: 0,
            include_docs: true,
        }
    }

    /// Every matching row with documents.
    pub fn all_docs() -> Self {
        Self {
            limit: None,
            offset: 0,
            include_docs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub id: DocId,
    pub key: Option<String>,
    pub doc: Option<Document>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexPage {
    /// Matches in the whole view, regardless of limit and offset.
    pub total: u64,
    pub rows: Vec<IndexRow>,
}

impl IndexPage {
    pub fn ids(&self) -> Vec<DocId> {
        self.rows.iter().map(|r| r.id.clone()).collect()
    }

    pub fn into_docs(self) -> Vec<Document> {
        self.rows.into_iter().filter_map(|r| r.doc).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_with(annotation: Value) -> Document {
        Document::new("d").with_field("q", annotation)
    }

    fn members(doc: &Document) -> Vec<IndexKind> {
        let design = DesignDoc::from_config(&QueueConfig {
            field: "q".to_string(),
            ..QueueConfig::default()
        });
        IndexKind::KINDS
            .into_iter()
            .filter(|k| design.index(*k).matches("q", doc))
            .collect()
    }

    #[test]
    fn pending_item_is_pending_and_all() {
        let doc = doc_with(json!({"at": "t0", "by": "w"}));
        assert_eq!(members(&doc), vec![IndexKind::Pending, IndexKind::All]);
    }

    #[test]
    fn locked_item_is_locked_and_all() {
        let doc = doc_with(json!({"at": "t0", "by": "w", "lock": {"at": "t1", "by": "w"}}));
        assert_eq!(members(&doc), vec![IndexKind::Locked, IndexKind::All]);
    }

    #[test]
    fn done_item_is_done_and_all_even_if_still_locked() {
        let doc = doc_with(json!({
            "at": "t0", "by": "w",
            "lock": {"at": "t1", "by": "w"},
            "done": {"at": "t2", "by": "w"}
        }));
        assert_eq!(members(&doc), vec![IndexKind::Done, IndexKind::All]);
    }

    #[test]
    fn plain_document_is_in_no_view() {
        let doc = Document::new("d").with_field("other", 1);
        assert!(members(&doc).is_empty());
        assert!(members(&doc_with(Value::Null)).is_empty());
    }

    #[test]
    fn sort_keys_follow_the_view() {
        let design = DesignDoc::from_config(&QueueConfig::default());
        let doc = Document::new("d").with_field(
            "hotseat",
            json!({"at": "t0", "by": "w", "lock": {"at": "t1", "by": "w"}}),
        );
        let field = &design.field;
        assert_eq!(
            design.index(IndexKind::All).sort_key(field, &doc).as_deref(),
            Some("t0")
        );
        assert_eq!(
            design.index(IndexKind::Locked).sort_key(field, &doc).as_deref(),
            Some("t1")
        );
        assert_eq!(design.index(IndexKind::Done).sort_key(field, &doc), None);
    }

    #[test]
    fn design_doc_survives_the_store() {
        let design = DesignDoc::from_config(&QueueConfig::default());
        let doc = design.to_document().unwrap();
        assert_eq!(doc.id.as_str(), "_design/hotseat_queue");
        assert_eq!(DesignDoc::from_document(&doc).unwrap(), design);
        assert_eq!(design.view_name(IndexKind::Pending), "hotseat_queue/pending");
    }
}
