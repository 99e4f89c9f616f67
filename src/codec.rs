//! Reads and rewrites the queue annotation on a document.
//!
//! Pure transformations on in-memory documents; nothing here talks to the
//! store. Every operation is scoped to one field name, so two queues with
//! different fields never touch each other's annotations.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{Annotation, Document, QueueState, Stamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    field: String,
}

impl Codec {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Decode the annotation, if any. A JSON `null` counts as absent.
    pub fn annotation(&self, doc: &Document) -> Result<Option<Annotation>> {
        match doc.get(&self.field) {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => Ok(Some(Annotation::deserialize(raw)?)),
        }
    }

    pub fn state(&self, doc: &Document) -> Result<QueueState> {
        Ok(self
            .annotation(doc)?
            .map_or(QueueState::Unqueued, |a| a.state()))
    }

    /// Annotate a plain document as pending.
    ///
    /// Re-enqueueing is refused: an existing annotation carries lock and
    /// done history that a silent overwrite would lose.
    pub fn patch(&self, doc: &mut Document, stamp: Stamp) -> Result<()> {
        if self.annotation(doc)?.is_some() {
            return Err(Error::AlreadyQueued(doc.id.clone()));
        }
        self.store(doc, &Annotation::new(stamp))
    }

    /// Strip the annotation. Returns whether there was one to strip.
    pub fn unpatch(&self, doc: &mut Document) -> bool {
        doc.fields.remove(&self.field).is_some()
    }

    pub fn add_lock(&self, doc: &mut Document, stamp: Stamp) -> Result<()> {
        let mut annotation = self.require(doc)?;
        if annotation.lock.is_some() {
            return Err(Error::AlreadyLocked(doc.id.clone()));
        }
        annotation.lock = Some(stamp);
        self.store(doc, &annotation)
    }

    pub fn remove_lock(&self, doc: &mut Document) -> Result<()> {
        let mut annotation = self.require(doc)?;
        if annotation.lock.take().is_none() {
            return Err(Error::NotLocked(doc.id.clone()));
        }
        self.store(doc, &annotation)
    }

    pub fn is_locked(&self, doc: &Document) -> Result<bool> {
        Ok(self
            .annotation(doc)?
            .is_some_and(|a| a.lock.is_some()))
    }

    /// Record completion. Leaves any lock in place.
    pub fn mark_done(&self, doc: &mut Document, stamp: Stamp) -> Result<()> {
        let mut annotation = self.require(doc)?;
        annotation.done = Some(stamp);
        self.store(doc, &annotation)
    }

    fn require(&self, doc: &Document) -> Result<Annotation> {
        self.annotation(doc)?
            .ok_or_else(|| Error::NotQueued(doc.id.clone()))
    }

    fn store(&self, doc: &mut Document, annotation: &Annotation) -> Result<()> {
        doc.fields
            .insert(self.field.clone(), serde_json::to_value(annotation)?);
        Ok(())
    }
}
