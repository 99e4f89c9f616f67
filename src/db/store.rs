//! [`DocumentStore`] over the Postgres `documents` table.
//!
//! Compare-and-swap is a conditional `UPDATE ... WHERE rev = $old`; a write
//! that touches no row lost the race.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use sqlx::PgPool;

use super::views;
use crate::error::{Error, Result};
use crate::index::{DesignDoc, IndexKind, IndexPage, IndexRow, QueryOptions};
use crate::model::{DocId, Document, Rev};
use crate::store::{DeleteOutcome, DocumentStore, Loaded, SaveOutcome, WriteOutcome};

/// Handle to one logical database. Cheap to clone.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    name: Arc<str>,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore").field("name", &self.name).finish()
    }
}

impl PgStore {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: Arc::from(name.into()),
        }
    }

    async fn write(&self, doc: &Document) -> Result<SaveOutcome> {
        let rev = Rev::next(doc.rev.as_ref());
        let body = Value::Object(doc.fields.clone());

        let rows = match &doc.rev {
            None => {
                sqlx::query(
                    "INSERT INTO documents (db, id, rev, body) VALUES ($1, $2, $3, $4)
                     ON CONFLICT (db, id) DO NOTHING",
                )
                .bind(&*self.name)
                .bind(doc.id.as_str())
                .bind(&rev.0)
                .bind(&body)
                .execute(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query(
                    "UPDATE documents SET rev = $1, body = $2, updated_at = now()
                     WHERE db = $3 AND id = $4 AND rev = $5",
                )
                .bind(&rev.0)
                .bind(&body)
                .bind(&*self.name)
                .bind(doc.id.as_str())
                .bind(&expected.0)
                .execute(&self.pool)
                .await?
            }
        }
        .rows_affected();

        if rows == 0 {
            tracing::debug!(db = %self.name, id = %doc.id, "conditional write rejected");
            return Ok(SaveOutcome::Conflict);
        }
        Ok(SaveOutcome::Saved(rev))
    }

    async fn exists(&self, id: &DocId) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM documents WHERE db = $1 AND id = $2")
            .bind(&*self.name)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

impl DocumentStore for PgStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &DocId) -> Result<Option<Document>> {
        let row: Option<DocumentRow> =
            sqlx::query_as("SELECT id, rev, body FROM documents WHERE db = $1 AND id = $2")
                .bind(&*self.name)
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(DocumentRow::try_into_document).transpose()
    }

    async fn bulk_get(&self, ids: &[DocId]) -> Result<Vec<Loaded>> {
        let wanted: Vec<String> = ids.iter().map(|id| id.0.clone()).collect();
        let rows: Vec<DocumentRow> =
            sqlx::query_as("SELECT id, rev, body FROM documents WHERE db = $1 AND id = ANY($2)")
                .bind(&*self.name)
                .bind(wanted)
                .fetch_all(&self.pool)
                .await?;

        let mut found: HashMap<String, Document> = HashMap::with_capacity(rows.len());
        for row in rows {
            let doc = row.try_into_document()?;
            found.insert(doc.id.0.clone(), doc);
        }
        Ok(ids
            .iter()
            .map(|id| match found.get(id.as_str()) {
                Some(doc) => Loaded::Found(doc.clone()),
                None => Loaded::Missing(id.clone()),
            })
            .collect())
    }

    async fn save(&self, doc: &Document) -> Result<SaveOutcome> {
        self.write(doc).await
    }

    async fn bulk_save(&self, docs: &[Document]) -> Result<Vec<WriteOutcome>> {
        let mut outcomes = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc.id.clone();
            outcomes.push(match self.write(doc).await {
                Ok(SaveOutcome::Saved(rev)) => WriteOutcome::Written { id, rev },
                Ok(SaveOutcome::Conflict) => WriteOutcome::Conflict { id },
                Err(e) => WriteOutcome::Failed {
                    id,
                    reason: e.to_string(),
                },
            });
        }
        Ok(outcomes)
    }

    async fn delete(&self, doc: &Document) -> Result<DeleteOutcome> {
        if let Some(rev) = &doc.rev {
            let rows = sqlx::query("DELETE FROM documents WHERE db = $1 AND id = $2 AND rev = $3")
                .bind(&*self.name)
                .bind(doc.id.as_str())
                .bind(&rev.0)
                .execute(&self.pool)
                .await?
                .rows_affected();
            if rows > 0 {
                return Ok(DeleteOutcome::Deleted);
            }
        }
        if self.exists(&doc.id).await? {
            Ok(DeleteOutcome::Conflict)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn define_index(&self, design: &DesignDoc) -> Result<()> {
        let doc = design.to_document()?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO documents (db, id, rev, body) VALUES ($1, $2, $3, $4)
             ON CONFLICT (db, id) DO UPDATE SET rev = EXCLUDED.rev, body = EXCLUDED.body, updated_at = now()
             WHERE documents.body IS DISTINCT FROM EXCLUDED.body",
        )
        .bind(&*self.name)
        .bind(doc.id.as_str())
        .bind(&Rev::next(None).0)
        .bind(Value::Object(doc.fields))
        .execute(&mut *tx)
        .await?;

        for spec in &design.indexes {
            sqlx::query(&views::index_ddl(design, spec)?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::info!(db = %self.name, design = %design.name, "queue views defined");
        Ok(())
    }

    async fn query_index(
        &self,
        design: &DesignDoc,
        kind: IndexKind,
        options: QueryOptions,
    ) -> Result<IndexPage> {
        if !self.exists(&design.id()).await? {
            return Err(Error::NotFound(design.id()));
        }

        let spec = design.index(kind);
        let predicate = views::predicate(design, spec)?;

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT count(*) FROM documents WHERE db = $1 AND {predicate}"))
                .bind(&*self.name)
                .fetch_one(&self.pool)
                .await?;

        if options.limit == Some(0) {
            return Ok(IndexPage {
                total: total as u64,
                rows: Vec::new(),
            });
        }

        let sql = format!(
            "SELECT id, rev, body, {key} AS key FROM documents
             WHERE db = $1 AND {predicate}
             ORDER BY {key} NULLS FIRST, id
             LIMIT $2 OFFSET $3",
            key = views::sort_key(design, spec)?,
        );
        let rows: Vec<(String, String, Value, Option<String>)> = sqlx::query_as(&sql)
            .bind(&*self.name)
            .bind(sql_limit(options.limit))
            .bind(sql_offset(options.offset))
            .fetch_all(&self.pool)
            .await?;

        let rows = rows
            .into_iter()
            .map(|(id, rev, body, key)| {
                let doc = DocumentRow { id, rev, body }.try_into_document()?;
                Ok(IndexRow {
                    id: doc.id.clone(),
                    key,
                    doc: options.include_docs.then_some(doc),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(IndexPage {
            total: total as u64,
            rows,
        })
    }
}

/// `LIMIT` bind value. Postgres treats `NULL` as no limit; sizes beyond
/// `i64` clamp instead of wrapping negative.
fn sql_limit(limit: Option<usize>) -> Option<i64> {
    limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX))
}

fn sql_offset(offset: usize) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    rev: String,
    body: Value,
}

impl DocumentRow {
    fn try_into_document(self) -> Result<Document> {
        let Value::Object(fields) = self.body else {
            return Err(Error::Other(format!(
                "document {} has a non-object body",
                self.id
            )));
        };
        Ok(Document {
            id: DocId(self.id),
            rev: Some(Rev(self.rev)),
            fields,
        })
    }
}
