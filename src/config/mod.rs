//! Typed configuration.
//!
//! [`QueueConfig`] names one queue instance: the annotation field and the
//! design/view names of its indexes. [`Config`] is process configuration
//! loaded from the environment by the binary; it fails fast if required vars
//! are missing. The database URL is wrapped in `SecretString` so it never
//! reaches logs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Naming for one queue instance. Two queues on the same store must differ
/// in `field` and `design_doc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Document field holding the queue annotation.
    pub field: String,
    pub design_doc: String,
    pub pending_view: String,
    pub locked_view: String,
    pub done_view: String,
    pub all_view: String,
    /// Per-call deadline for store operations. None waits indefinitely.
    pub timeout_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            field: "hotseat".to_string(),
            design_doc: "hotseat_queue".to_string(),
            pending_view: "pending".to_string(),
            locked_view: "locked".to_string(),
            done_view: "done".to_string(),
            all_view: "all".to_string(),
            timeout_ms: None,
        }
    }
}

impl QueueConfig {
    /// A queue whose field and design doc are both `name`.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            field: name.clone(),
            design_doc: name,
            ..Self::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| Error::Config(format!("bad queue config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading queue config");
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Names end up in SQL identifiers and JSON paths, so they are limited
    /// to `[A-Za-z0-9_]`.
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("field", &self.field),
            ("design_doc", &self.design_doc),
            ("pending_view", &self.pending_view),
            ("locked_view", &self.locked_view),
            ("done_view", &self.done_view),
            ("all_view", &self.all_view),
        ];
        for (key, value) in names {
            if value.is_empty() {
                return Err(Error::Config(format!("{key} must not be empty")));
            }
            if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(Error::Config(format!(
                    "{key} {value:?} may only contain ASCII letters, digits and '_'"
                )));
            }
        }
        let views = [
            &self.pending_view,
            &self.locked_view,
            &self.done_view,
            &self.all_view,
        ];
        for (i, a) in views.iter().enumerate() {
            if views[i + 1..].contains(a) {
                return Err(Error::Config(format!("view name {a:?} is used twice")));
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::Config("timeout_ms must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Logical database (document namespace) the binary operates on.
    pub database: String,
    pub queue: QueueConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let queue = match std::env::var("HOTSEAT_QUEUE_CONFIG").ok() {
            Some(path) => QueueConfig::load(&PathBuf::from(path))?,
            None => QueueConfig::default(),
        };
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            database: std::env::var("HOTSEAT_DB").unwrap_or_else(|_| "hotseat".to_string()),
            queue,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
