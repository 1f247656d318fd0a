//! Idempotent, column-aware index creation.

use std::time::{Duration, Instant};

use sea_orm::{ConnectionTrait, DbErr};
use tracing::warn;

use crate::introspect::SchemaIntrospector;
use crate::observer::MigrationObserver;
use crate::sql::{quote_ident, statement};

/// Declarative description of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub table: String,
    pub name: String,
    pub sql: String,
    /// Columns that must exist before the index can be created.
    pub required_columns: Vec<String>,
}

impl IndexSpec {
    /// `CREATE INDEX IF NOT EXISTS <name> ON <table> (<columns>)`.
    #[must_use]
    pub fn on(table: &str, name: &str, columns: &[&str]) -> Self {
        let cols = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            table: table.to_owned(),
            name: name.to_owned(),
            sql: format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({cols})",
                quote_ident(name),
                quote_ident(table)
            ),
            required_columns: columns.iter().map(|c| (*c).to_owned()).collect(),
        }
    }

    /// Hand-written index statement with its column requirements.
    #[must_use]
    pub fn raw(table: &str, name: &str, sql: &str, required_columns: &[&str]) -> Self {
        Self {
            table: table.to_owned(),
            name: name.to_owned(),
            sql: sql.to_owned(),
            required_columns: required_columns.iter().map(|c| (*c).to_owned()).collect(),
        }
    }

    /// Make this a partial index. `columns` lists what the predicate reads.
    #[must_use]
    pub fn filtered(mut self, predicate: &str, columns: &[&str]) -> Self {
        self.sql = format!("{} WHERE {predicate}", self.sql);
        for c in columns {
            if !self.required_columns.iter().any(|r| r == c) {
                self.required_columns.push((*c).to_owned());
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Created { elapsed: Duration },
    AlreadyPresent,
    Skipped { missing: Vec<String> },
}

impl IndexOutcome {
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

pub struct IndexAdvisor<'a> {
    observer: &'a dyn MigrationObserver,
}

impl<'a> IndexAdvisor<'a> {
    #[must_use]
    pub fn new(observer: &'a dyn MigrationObserver) -> Self {
        Self { observer }
    }

    /// Create `spec` unless it exists or one of its columns is still missing.
    ///
    /// # Errors
    /// Returns the driver error if introspection or `CREATE INDEX` fails.
    pub async fn ensure_index<C: ConnectionTrait>(
        &self,
        conn: &C,
        spec: &IndexSpec,
    ) -> Result<IndexOutcome, DbErr> {
        let introspector = SchemaIntrospector::new(conn);

        let missing = introspector
            .missing_columns(&spec.table, &spec.required_columns)
            .await?;
        if !missing.is_empty() {
            self.observer.index_skipped(&spec.table, &spec.name, &missing);
            return Ok(IndexOutcome::Skipped { missing });
        }

        if introspector.index_exists(&spec.name).await? {
            return Ok(IndexOutcome::AlreadyPresent);
        }

        let started = Instant::now();
        conn.execute(statement(spec.sql.clone())).await?;
        let elapsed = started.elapsed();
        self.observer.index_created(&spec.table, &spec.name, elapsed);
        Ok(IndexOutcome::Created { elapsed })
    }

    /// # Errors
    /// Stops at the first index that fails to create.
    pub async fn ensure_all<C: ConnectionTrait>(
        &self,
        conn: &C,
        specs: &[IndexSpec],
    ) -> Result<Vec<IndexOutcome>, DbErr> {
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            outcomes.push(self.ensure_index(conn, spec).await?);
        }
        Ok(outcomes)
    }

    /// An index is satisfied when present, or when it cannot exist yet.
    ///
    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn is_satisfied<C: ConnectionTrait>(
        conn: &C,
        spec: &IndexSpec,
    ) -> Result<bool, DbErr> {
        let introspector = SchemaIntrospector::new(conn);
        if introspector.index_exists(&spec.name).await? {
            return Ok(true);
        }
        let missing = introspector
            .missing_columns(&spec.table, &spec.required_columns)
            .await?;
        if missing.is_empty() {
            return Ok(false);
        }
        warn!(
            table = %spec.table,
            index = %spec.name,
            ?missing,
            "Index columns are missing; treating index as not yet applicable"
        );
        Ok(true)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::Db;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn missing_columns_are_reported_when_checking_satisfaction() {
        let db = Db::in_memory().await.unwrap();
        let conn = db.conn();
        conn.execute(statement("CREATE TABLE notes (id TEXT PRIMARY KEY)"))
            .await
            .unwrap();
        let spec = IndexSpec::on("notes", "idx_notes_updated", &["updated_at"]);

        assert!(IndexAdvisor::is_satisfied(conn, &spec).await.unwrap());
        assert!(logs_contain("Index columns are missing"));
        assert!(logs_contain("idx_notes_updated"));
    }
}
