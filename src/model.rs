//! Core data model.
//!
//! A queue item is any store document that carries a queue annotation under
//! the queue's configured field. The store owns documents and their revision
//! tokens; the queue only ever rewrites the annotation.

pub mod annotation;
pub mod document;

pub use annotation::{Annotation, QueueState, Stamp};
pub use document::{DocId, Document, Rev, WorkerId};
