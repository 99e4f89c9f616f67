//! Postgres-backed document store: connection pool, migrations, and
//! database enumeration.
//!
//! One `documents` table holds every logical database; [`PgStore`] is a
//! handle to one of them.

pub mod store;
mod views;

pub use store::PgStore;

use crate::config::QueueConfig;
use crate::error::Result;
use crate::queue::Queue;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Server handle. Owns the connection pool shared by every [`PgStore`].
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Handle to one logical database. Databases exist once they hold a
    /// document.
    pub fn store(&self, name: impl Into<String>) -> PgStore {
        PgStore::new(self.pool.clone(), name)
    }

    /// Names of every database holding at least one document.
    pub async fn databases(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT db FROM documents ORDER BY db")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(db,)| db).collect())
    }

    /// Databases that are queues under `config`.
    pub async fn queues(&self, config: &QueueConfig) -> Result<Vec<String>> {
        let mut queues = Vec::new();
        for name in self.databases().await? {
            if Queue::is_queue(&self.store(name.as_str()), config).await? {
                queues.push(name);
            }
        }
        Ok(queues)
    }

    /// Delete every document of a database. Returns how many were removed.
    pub async fn drop_database(&self, name: &str) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM documents WHERE db = $1")
            .bind(name)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }
}
