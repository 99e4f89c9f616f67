//! Compiles view definitions to SQL over the `documents` table.
//!
//! Field and view names are spliced into SQL text (JSON paths and index
//! names cannot be bound as parameters), so each one is re-checked here
//! against the same `[A-Za-z0-9_]` rule `QueueConfig::validate` enforces.

use crate::error::{Error, Result};
use crate::index::{Clause, DESIGN_PREFIX, DesignDoc, IndexSpec, Part};

fn ident(name: &str) -> Result<&str> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(Error::Config(format!("{name:?} is not a valid queue identifier")))
    }
}

/// `'{field,lock}'`-style JSON path literal for a part.
fn path_literal(field: &str, part: Part, leaf: Option<&str>) -> String {
    let mut segments = vec![field];
    segments.extend(part.path());
    segments.extend(leaf);
    format!("'{{{}}}'", segments.join(","))
}

fn clause_sql(field: &str, clause: Clause) -> String {
    let (part, op) = match clause {
        Clause::Present(part) => (part, "<>"),
        Clause::Absent(part) => (part, "="),
    };
    format!(
        "COALESCE(jsonb_typeof(body #> {}), 'null') {op} 'null'",
        path_literal(field, part, None)
    )
}

/// WHERE fragment selecting the view's members (excluding design docs).
pub(crate) fn predicate(design: &DesignDoc, spec: &IndexSpec) -> Result<String> {
    let field = ident(&design.field)?;
    let mut parts = vec![format!("left(id, {}) <> '{DESIGN_PREFIX}'", DESIGN_PREFIX.len())];
    parts.extend(spec.clauses.iter().map(|c| clause_sql(field, *c)));
    Ok(parts.join(" AND "))
}

/// Text expression of the view's sort key.
pub(crate) fn sort_key(design: &DesignDoc, spec: &IndexSpec) -> Result<String> {
    let field = ident(&design.field)?;
    Ok(format!(
        "(body #>> {})",
        path_literal(field, spec.sort_key, Some("at"))
    ))
}

/// Partial expression index backing one view.
pub(crate) fn index_ddl(design: &DesignDoc, spec: &IndexSpec) -> Result<String> {
    let name = format!("hs_{}_{}", ident(&design.name)?, ident(&spec.name)?);
    Ok(format!(
        "CREATE INDEX IF NOT EXISTS {name} ON documents (db, {}, id) WHERE {}",
        sort_key(design, spec)?,
        predicate(design, spec)?
    ))
}
