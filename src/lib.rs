//! # hotseat
//!
//! Work queues that live inside the documents of a shared document store.
//!
//! Queue state is an annotation embedded in each document; four views
//! (pending, locked, done, all) derive counts and listings from it, and
//! workers lease documents with compare-and-swap writes on the document
//! revision instead of a lock manager. Backends: an in-process
//! [`MemoryStore`] and a Postgres JSONB store ([`db::PgStore`]).
//!
//! ```no_run
//! # async fn demo() -> hotseat::Result<()> {
//! use hotseat::{DocId, Document, DocumentStore, MemoryStore, Queue, QueueConfig, WorkerId};
//!
//! let store = MemoryStore::new("jobs");
//! store.save(&Document::new("job-1").with_field("url", "https://example.com")).await?;
//!
//! let queue = Queue::open(store, QueueConfig::default()).await?;
//! let worker = WorkerId::generate();
//! queue.enqueue(&DocId::from("job-1"), &worker).await?;
//!
//! if let Some(leased) = queue.lease(&worker, 10).await? {
//!     for doc in leased {
//!         queue.remove(&doc.id, &worker, Default::default()).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod bulk;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod lease;
pub mod model;
pub mod queue;
pub mod store;
pub mod telemetry;

pub use bulk::{BulkError, BulkErrorReason, BulkReport};
pub use config::{Config, QueueConfig};
pub use error::{Error, Result};
pub use index::IndexKind;
pub use lease::RemoveOptions;
pub use model::{DocId, Document, QueueState, Rev, WorkerId};
pub use queue::Queue;
pub use store::{DocumentStore, MemoryStore};
