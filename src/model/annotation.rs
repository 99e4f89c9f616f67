//! The queue annotation embedded in a document, and the typed state derived
//! from it.
//!
//! Wire form under the configured field:
//!
//! ```json
//! { "at": "...", "by": "...", "lock": { "at": "...", "by": "..." }, "done": { "at": "...", "by": "..." } }
//! ```
//!
//! `lock` and `done` are optional. Timestamps are written as RFC 3339 UTC with
//! microsecond precision so their text order is their time order; index sort
//! keys rely on that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkerId;

/// Who did something, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    #[serde(with = "sortable_time")]
    pub at: DateTime<Utc>,
    pub by: WorkerId,
}

impl Stamp {
    pub fn new(at: DateTime<Utc>, by: WorkerId) -> Self {
        Self { at, by }
    }

    pub fn now(by: &WorkerId) -> Self {
        Self::new(Utc::now(), by.clone())
    }
}

/// Raw annotation as stored on the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(flatten)]
    pub enqueued: Stamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<Stamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<Stamp>,
}

impl Annotation {
    pub fn new(enqueued: Stamp) -> Self {
        Self {
            enqueued,
            lock: None,
            done: None,
        }
    }

    /// Collapse presence of `lock`/`done` into one state. `done` wins.
    pub fn state(&self) -> QueueState {
        let enqueued = self.enqueued.clone();
        match (&self.lock, &self.done) {
            (_, Some(done)) => QueueState::Done {
                enqueued,
                done: done.clone(),
            },
            (Some(lock), None) => QueueState::Locked {
                enqueued,
                lock: lock.clone(),
            },
            (None, None) => QueueState::Pending { enqueued },
        }
    }
}

/// Where a document stands with respect to one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    /// No annotation; a plain domain document.
    Unqueued,
    /// Waiting to be leased.
    Pending { enqueued: Stamp },
    /// Leased by a worker.
    Locked { enqueued: Stamp, lock: Stamp },
    /// Finished. History stays on the document until forgotten.
    Done { enqueued: Stamp, done: Stamp },
}

impl QueueState {
    pub fn is_queued(&self) -> bool {
        !matches!(self, QueueState::Unqueued)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, QueueState::Locked { .. })
    }

    pub fn is_done(&self) -> bool {
        matches!(self, QueueState::Done { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueState::Unqueued => "unqueued",
            QueueState::Pending { .. } => "pending",
            QueueState::Locked { .. } => "locked",
            QueueState::Done { .. } => "done",
        }
    }
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-width RFC 3339 timestamps (`2024-01-02T03:04:05.000006Z`).
pub(crate) mod sortable_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
