//! Shadow-table rebuilds.
//!
//! `SQLite` cannot add constraints, drop constrained columns or change a primary
//! key type in place. A rebuild creates `<table>__rebuild` with the target
//! shape, copies rows across with optional transforms, swaps the tables and
//! reissues the indexes and triggers that still make sense. All of it runs in
//! one transaction, so a failure leaves the original table untouched.
//!
//! Inside projections and filters the source table is aliased `src`; when a
//! key remap is active the key map is aliased `km` (`km.old_key`, `km.new_key`).
//!
//! Column-level `UNIQUE`/`CHECK` clauses are not carried across a rebuild;
//! express them as indexes.

use std::collections::BTreeSet;
use std::time::Instant;

use sea_orm::{
    ConnectionTrait, DatabaseTransaction, DbErr, TransactionTrait, Value,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::index_advisor::{IndexAdvisor, IndexSpec};
use crate::introspect::{ColumnInfo, SchemaIntrospector, SchemaObject, TableSnapshot};
use crate::observer::MigrationObserver;
use crate::sql::{count_rows, execute, quote_ident, statement, statement_with};

const KEYMAP_CHUNK: usize = 250;

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("table '{0}' does not exist")]
    MissingTable(String),

    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("key remap on '{table}' needs a single integer primary key, got '{column}'")]
    InvalidKey { table: String, column: String },

    #[error(transparent)]
    Db(#[from] DbErr),
}

/// One column of a target table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default_sql: Option<String>,
}

impl ColumnSpec {
    #[must_use]
    pub fn new(name: &str, declared_type: &str) -> Self {
        Self {
            name: name.to_owned(),
            declared_type: declared_type.to_owned(),
            not_null: false,
            default_sql: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    #[must_use]
    pub fn default(mut self, expr: &str) -> Self {
        self.default_sql = Some(expr.to_owned());
        self
    }

    fn definition(&self, inline_pk: Option<bool>) -> String {
        let mut parts = vec![quote_ident(&self.name)];
        if !self.declared_type.is_empty() {
            parts.push(self.declared_type.clone());
        }
        if self.not_null {
            parts.push("NOT NULL".to_owned());
        }
        if let Some(default) = &self.default_sql {
            parts.push(format!("DEFAULT ({default})"));
        }
        match inline_pk {
            Some(true) => parts.push("PRIMARY KEY AUTOINCREMENT".to_owned()),
            Some(false) => parts.push("PRIMARY KEY".to_owned()),
            None => {}
        }
        parts.join(" ")
    }
}

impl From<&ColumnInfo> for ColumnSpec {
    fn from(info: &ColumnInfo) -> Self {
        Self {
            name: info.name.clone(),
            declared_type: info.declared_type.clone(),
            not_null: info.not_null,
            default_sql: info.default_sql.clone(),
        }
    }
}

/// The shape a table should have after the rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSchema {
    columns: Vec<ColumnSpec>,
    primary_key: Vec<String>,
    autoincrement: bool,
}

impl TargetSchema {
    #[must_use]
    pub fn from_snapshot(snapshot: &TableSnapshot) -> Self {
        Self {
            columns: snapshot.columns.iter().map(ColumnSpec::from).collect(),
            primary_key: snapshot
                .primary_key()
                .into_iter()
                .map(|c| c.name.clone())
                .collect(),
            autoincrement: snapshot.autoincrement,
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    #[must_use]
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    fn column_mut(&mut self, table: &str, name: &str) -> Result<&mut ColumnSpec, RebuildError> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| RebuildError::UnknownColumn {
                table: table.to_owned(),
                column: name.to_owned(),
            })
    }

    fn apply(&mut self, table: &str, edit: &SchemaEdit) -> Result<(), RebuildError> {
        match edit {
            SchemaEdit::Drop(name) => {
                self.column_mut(table, name)?;
                self.columns.retain(|c| &c.name != name);
                self.primary_key.retain(|c| c != name);
            }
            SchemaEdit::Require(name) => {
                self.column_mut(table, name)?.not_null = true;
            }
            SchemaEdit::Retype(name, ty) => {
                self.column_mut(table, name)?.declared_type.clone_from(ty);
                if self.primary_key.iter().any(|c| c == name) {
                    self.autoincrement = false;
                }
            }
            SchemaEdit::Add(spec) => {
                if !self.has_column(&spec.name) {
                    self.columns.push(spec.clone());
                }
            }
        }
        Ok(())
    }

    fn create_sql(&self, table: &str) -> String {
        let single_pk = match self.primary_key.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        };
        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let inline_pk = (single_pk == Some(c.name.as_str())).then_some(self.autoincrement);
                c.definition(inline_pk)
            })
            .collect();
        if self.primary_key.len() > 1 {
            let cols = self
                .primary_key
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            defs.push(format!("PRIMARY KEY ({cols})"));
        }
        format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "))
    }
}

#[derive(Debug, Clone)]
enum SchemaEdit {
    Drop(String),
    Require(String),
    Retype(String, String),
    Add(ColumnSpec),
}

#[derive(Debug, Clone)]
struct BoundSql {
    sql: String,
    values: Vec<Value>,
}

/// Queue rows that must follow a key remap.
#[derive(Debug, Clone)]
struct Requeue {
    table: String,
    entity_column: String,
    kind_column: String,
    kinds: Vec<String>,
}

/// Replace an integer key with generated opaque string ids.
#[derive(Debug, Clone)]
pub struct KeyRemap {
    column: String,
    dependents: Vec<(String, String)>,
    requeue: Option<Requeue>,
    generator: fn() -> String,
}

fn uuid_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl KeyRemap {
    #[must_use]
    pub fn new(column: &str) -> Self {
        Self {
            column: column.to_owned(),
            dependents: Vec::new(),
            requeue: None,
            generator: uuid_key,
        }
    }

    /// Rewrite `table.column` from old keys to new keys.
    #[must_use]
    pub fn dependent(mut self, table: &str, column: &str) -> Self {
        self.dependents.push((table.to_owned(), column.to_owned()));
        self
    }

    /// Re-enqueue queued operations of `kinds` under the new key and drop the old entries.
    #[must_use]
    pub fn requeue(mut self, table: &str, entity_column: &str, kind_column: &str, kinds: &[&str]) -> Self {
        self.requeue = Some(Requeue {
            table: table.to_owned(),
            entity_column: entity_column.to_owned(),
            kind_column: kind_column.to_owned(),
            kinds: kinds.iter().map(|k| (*k).to_owned()).collect(),
        });
        self
    }

    #[must_use]
    pub fn with_generator(mut self, generator: fn() -> String) -> Self {
        self.generator = generator;
        self
    }
}

/// Everything a rebuild of one table needs to know.
#[derive(Debug, Clone)]
pub struct RebuildPlan {
    table: String,
    edits: Vec<SchemaEdit>,
    projections: Vec<(String, BoundSql)>,
    filter: Option<BoundSql>,
    key_remap: Option<KeyRemap>,
    retire_triggers: Vec<String>,
    extra_indexes: Vec<IndexSpec>,
    post_statements: Vec<BoundSql>,
}

impl RebuildPlan {
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_owned(),
            edits: Vec::new(),
            projections: Vec::new(),
            filter: None,
            key_remap: None,
            retire_triggers: Vec::new(),
            extra_indexes: Vec::new(),
            post_statements: Vec::new(),
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn drop_column(mut self, column: &str) -> Self {
        self.edits.push(SchemaEdit::Drop(column.to_owned()));
        self
    }

    /// Mark `column` NOT NULL in the target.
    #[must_use]
    pub fn require(mut self, column: &str) -> Self {
        self.edits.push(SchemaEdit::Require(column.to_owned()));
        self
    }

    #[must_use]
    pub fn retype(mut self, column: &str, declared_type: &str) -> Self {
        self.edits
            .push(SchemaEdit::Retype(column.to_owned(), declared_type.to_owned()));
        self
    }

    #[must_use]
    pub fn add_column(mut self, spec: ColumnSpec) -> Self {
        self.edits.push(SchemaEdit::Add(spec));
        self
    }

    /// Fill `column` from a SQL expression instead of copying it.
    #[must_use]
    pub fn project(self, column: &str, expr: &str) -> Self {
        self.project_with(column, expr, Vec::new())
    }

    #[must_use]
    pub fn project_with(mut self, column: &str, expr: &str, values: Vec<Value>) -> Self {
        self.projections.retain(|(c, _)| c != column);
        self.projections.push((
            column.to_owned(),
            BoundSql {
                sql: expr.to_owned(),
                values,
            },
        ));
        self
    }

    /// Only copy rows matching `predicate`; the rest are dropped.
    #[must_use]
    pub fn filter(self, predicate: &str) -> Self {
        self.filter_with(predicate, Vec::new())
    }

    #[must_use]
    pub fn filter_with(mut self, predicate: &str, values: Vec<Value>) -> Self {
        self.filter = Some(BoundSql {
            sql: predicate.to_owned(),
            values,
        });
        self
    }

    #[must_use]
    pub fn remap_key(mut self, remap: KeyRemap) -> Self {
        self.key_remap = Some(remap);
        self
    }

    /// Do not reissue this trigger after the swap.
    #[must_use]
    pub fn retire_trigger(mut self, name: &str) -> Self {
        self.retire_triggers.push(name.to_owned());
        self
    }

    #[must_use]
    pub fn with_index(mut self, spec: IndexSpec) -> Self {
        self.extra_indexes.push(spec);
        self
    }

    /// Run `sql` after the swap, inside the rebuild transaction.
    #[must_use]
    pub fn then_execute(self, sql: &str) -> Self {
        self.then_execute_with(sql, Vec::new())
    }

    #[must_use]
    pub fn then_execute_with(mut self, sql: &str, values: Vec<Value>) -> Self {
        self.post_statements.push(BoundSql {
            sql: sql.to_owned(),
            values,
        });
        self
    }

    fn shadow_name(&self) -> String {
        format!("{}__rebuild", self.table)
    }

    fn keymap_name(&self) -> String {
        format!("{}__keymap", self.table)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub table: String,
    pub rows_before: i64,
    pub rows_after: i64,
    pub dropped_rows: i64,
    pub remapped_keys: i64,
    pub requeued_ops: u64,
    pub reissued_indexes: Vec<String>,
    pub skipped_indexes: Vec<String>,
    pub reissued_triggers: Vec<String>,
}

pub struct TableRebuilder<'a> {
    observer: &'a dyn MigrationObserver,
}

impl<'a> TableRebuilder<'a> {
    #[must_use]
    pub fn new(observer: &'a dyn MigrationObserver) -> Self {
        Self { observer }
    }

    /// Run `plan` in its own transaction (a savepoint when `conn` already is one).
    ///
    /// # Errors
    /// Any failure rolls the transaction back and is returned; the original table
    /// is left as it was.
    pub async fn execute<C>(&self, conn: &C, plan: &RebuildPlan) -> Result<RebuildReport, RebuildError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let started = Instant::now();
        let txn = conn.begin().await?;
        match self.run(&txn, plan).await {
            Ok(report) => {
                txn.commit().await?;
                self.observer.table_rebuilt(&report, started.elapsed());
                Ok(report)
            }
            Err(e) => {
                warn!(table = %plan.table, error = %e, "Table rebuild failed, rolling back");
                _ = txn.rollback().await;
                Err(e)
            }
        }
    }

    async fn run(&self, txn: &DatabaseTransaction, plan: &RebuildPlan) -> Result<RebuildReport, RebuildError> {
        let introspector = SchemaIntrospector::new(txn);
        let shadow = plan.shadow_name();

        let snapshot = introspector
            .snapshot(&plan.table)
            .await?
            .ok_or_else(|| RebuildError::MissingTable(plan.table.clone()))?;

        execute(txn, statement(format!("DROP TABLE IF EXISTS {}", quote_ident(&shadow)))).await?;

        let indexes = introspector.indexes_on(&plan.table).await?;
        let mut index_columns = Vec::with_capacity(indexes.len());
        for idx in &indexes {
            index_columns.push(introspector.index_columns(&idx.name).await?);
        }
        let triggers = introspector.triggers_on(&plan.table).await?;

        let mut target = TargetSchema::from_snapshot(&snapshot);
        for edit in &plan.edits {
            target.apply(&plan.table, edit)?;
        }
        for (column, _) in &plan.projections {
            if !target.has_column(column) {
                return Err(RebuildError::UnknownColumn {
                    table: plan.table.clone(),
                    column: column.clone(),
                });
            }
        }

        debug!(table = %plan.table, shadow = %shadow, "Creating shadow table");
        execute(txn, statement(target.create_sql(&shadow))).await?;

        let remapped_keys = match &plan.key_remap {
            Some(remap) => build_keymap(txn, plan, &snapshot, remap).await?,
            None => 0,
        };

        let rows_before = count_rows(txn, &plan.table, None).await?;
        execute(txn, copy_statement(plan, &snapshot, &target, &shadow)).await?;
        let rows_after = count_rows(txn, &shadow, None).await?;

        let mut requeued_ops = 0;
        if let Some(remap) = &plan.key_remap {
            requeued_ops = remap_dependents(txn, plan, remap).await?;
        }

        execute(txn, statement(format!("DROP TABLE {}", quote_ident(&plan.table)))).await?;
        execute(
            txn,
            statement(format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(&shadow),
                quote_ident(&plan.table)
            )),
        )
        .await?;

        let mut report = RebuildReport {
            table: plan.table.clone(),
            rows_before,
            rows_after,
            dropped_rows: rows_before - rows_after,
            remapped_keys,
            requeued_ops,
            ..RebuildReport::default()
        };

        self.reissue_indexes(txn, plan, &target, &indexes, &index_columns, &mut report)
            .await?;
        for trigger in &triggers {
            if plan.retire_triggers.iter().any(|t| t == &trigger.name) {
                debug!(table = %plan.table, trigger = %trigger.name, "Retiring trigger");
                continue;
            }
            execute(txn, statement(trigger.sql.clone())).await?;
            report.reissued_triggers.push(trigger.name.clone());
        }

        let advisor = IndexAdvisor::new(self.observer);
        for spec in &plan.extra_indexes {
            if !advisor.ensure_index(txn, spec).await?.is_skipped() {
                report.reissued_indexes.push(spec.name.clone());
            }
        }

        for post in &plan.post_statements {
            execute(txn, statement_with(post.sql.clone(), post.values.clone())).await?;
        }

        if plan.key_remap.is_some() {
            execute(
                txn,
                statement(format!("DROP TABLE IF EXISTS temp.{}", quote_ident(&plan.keymap_name()))),
            )
            .await?;
        }

        Ok(report)
    }

    async fn reissue_indexes(
        &self,
        txn: &DatabaseTransaction,
        plan: &RebuildPlan,
        target: &TargetSchema,
        indexes: &[SchemaObject],
        index_columns: &[Vec<String>],
        report: &mut RebuildReport,
    ) -> Result<(), RebuildError> {
        for (idx, columns) in indexes.iter().zip(index_columns) {
            let missing: Vec<String> = columns
                .iter()
                .filter(|c| !target.has_column(c))
                .cloned()
                .collect();
            if missing.is_empty() {
                execute(txn, statement(idx.sql.clone())).await?;
                report.reissued_indexes.push(idx.name.clone());
            } else {
                self.observer.index_skipped(&plan.table, &idx.name, &missing);
                report.skipped_indexes.push(idx.name.clone());
            }
        }
        Ok(())
    }
}

/// Create and fill the temporary old-key to new-key map. Returns the mapped key count.
async fn build_keymap(
    txn: &DatabaseTransaction,
    plan: &RebuildPlan,
    snapshot: &TableSnapshot,
    remap: &KeyRemap,
) -> Result<i64, RebuildError> {
    let pk = snapshot.primary_key();
    let key = match pk.as_slice() {
        [only] if only.name == remap.column
            && only.declared_type.to_ascii_uppercase().contains("INT") =>
        {
            *only
        }
        _ => {
            return Err(RebuildError::InvalidKey {
                table: plan.table.clone(),
                column: remap.column.clone(),
            });
        }
    };

    let keymap = quote_ident(&plan.keymap_name());
    execute(txn, statement(format!("DROP TABLE IF EXISTS temp.{keymap}"))).await?;
    execute(
        txn,
        statement(format!(
            "CREATE TEMP TABLE {keymap} (old_key {} PRIMARY KEY, new_key TEXT NOT NULL UNIQUE)",
            key.declared_type
        )),
    )
    .await?;

    let rows = txn
        .query_all(statement(format!(
            "SELECT {col} FROM {table} ORDER BY {col}",
            col = quote_ident(&key.name),
            table = quote_ident(&plan.table)
        )))
        .await?;
    let mut keys = Vec::with_capacity(rows.len());
    for row in rows {
        keys.push(row.try_get_by_index::<i64>(0)?);
    }

    for chunk in keys.chunks(KEYMAP_CHUNK) {
        let placeholders = vec!["(?, ?)"; chunk.len()].join(", ");
        let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * 2);
        for old in chunk {
            values.push((*old).into());
            values.push((remap.generator)().into());
        }
        execute(
            txn,
            statement_with(
                format!("INSERT INTO temp.{keymap} (old_key, new_key) VALUES {placeholders}"),
                values,
            ),
        )
        .await?;
    }

    Ok(i64::try_from(keys.len()).unwrap_or(i64::MAX))
}

/// `INSERT INTO shadow (...) SELECT ... FROM table AS src ...`.
///
/// Bound values follow target column order, then the filter's values.
fn copy_statement(
    plan: &RebuildPlan,
    snapshot: &TableSnapshot,
    target: &TargetSchema,
    shadow: &str,
) -> sea_orm::Statement {
    let source_columns: BTreeSet<String> = snapshot.column_names();
    let remap_column = plan.key_remap.as_ref().map(|r| r.column.as_str());

    let mut columns = Vec::new();
    let mut exprs = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    for col in target.columns() {
        let projected = plan.projections.iter().find(|(c, _)| c == &col.name);
        if let Some((_, expr)) = projected {
            exprs.push(format!("({})", expr.sql));
            values.extend(expr.values.iter().cloned());
        } else if remap_column == Some(col.name.as_str()) {
            exprs.push("km.new_key".to_owned());
        } else if source_columns.contains(&col.name) {
            exprs.push(format!("src.{}", quote_ident(&col.name)));
        } else {
            continue;
        }
        columns.push(quote_ident(&col.name));
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} AS src",
        quote_ident(shadow),
        columns.join(", "),
        exprs.join(", "),
        quote_ident(&plan.table)
    );
    if let Some(remap) = &plan.key_remap {
        sql = format!(
            "{sql} JOIN temp.{} AS km ON km.old_key = src.{}",
            quote_ident(&plan.keymap_name()),
            quote_ident(&remap.column)
        );
    }
    if let Some(filter) = &plan.filter {
        sql = format!("{sql} WHERE {}", filter.sql);
        values.extend(filter.values.iter().cloned());
    }

    statement_with(sql, values)
}

/// Rewrite dependent columns and requeue queued operations. Returns the requeued count.
async fn remap_dependents(
    txn: &DatabaseTransaction,
    plan: &RebuildPlan,
    remap: &KeyRemap,
) -> Result<u64, RebuildError> {
    let keymap = format!("temp.{}", quote_ident(&plan.keymap_name()));

    for (table, column) in &remap.dependents {
        let col = quote_ident(column);
        let tbl = quote_ident(table);
        let updated = execute(
            txn,
            statement(format!(
                "UPDATE {tbl} SET {col} = (SELECT km.new_key FROM {keymap} AS km WHERE km.old_key = {tbl}.{col}) \
                 WHERE {col} IN (SELECT old_key FROM {keymap})"
            )),
        )
        .await?;
        debug!(table = %plan.table, dependent = %table, column = %column, updated, "Dependent keys remapped");
    }

    let Some(requeue) = &remap.requeue else {
        return Ok(0);
    };

    let queue = SchemaIntrospector::new(txn)
        .snapshot(&requeue.table)
        .await?
        .ok_or_else(|| RebuildError::MissingTable(requeue.table.clone()))?;
    if !queue.has_column(&requeue.entity_column) {
        return Err(RebuildError::UnknownColumn {
            table: requeue.table.clone(),
            column: requeue.entity_column.clone(),
        });
    }

    let mut columns = Vec::new();
    let mut exprs = Vec::new();
    for col in &queue.columns {
        let rowid_key = col.pk_position > 0 && col.declared_type.to_ascii_uppercase().contains("INT");
        if rowid_key {
            continue;
        }
        columns.push(quote_ident(&col.name));
        if col.name == requeue.entity_column {
            exprs.push("km.new_key".to_owned());
        } else {
            exprs.push(format!("op.{}", quote_ident(&col.name)));
        }
    }

    let kinds = vec!["?"; requeue.kinds.len()].join(", ");
    let kind_values: Vec<Value> = requeue.kinds.iter().map(|k| k.clone().into()).collect();
    let q = quote_ident(&requeue.table);
    let entity = quote_ident(&requeue.entity_column);
    let kind = quote_ident(&requeue.kind_column);

    let requeued = execute(
        txn,
        statement_with(
            format!(
                "INSERT INTO {q} ({}) SELECT {} FROM {q} AS op JOIN {keymap} AS km ON km.old_key = op.{entity} \
                 WHERE op.{kind} IN ({kinds}) ORDER BY op.rowid",
                columns.join(", "),
                exprs.join(", ")
            ),
            kind_values.clone(),
        ),
    )
    .await?;
    let purged = execute(
        txn,
        statement_with(
            format!(
                "DELETE FROM {q} WHERE {kind} IN ({kinds}) AND {entity} IN (SELECT old_key FROM {keymap})"
            ),
            kind_values,
        ),
    )
    .await?;
    debug!(table = %plan.table, queue = %requeue.table, requeued, purged, "Queued operations re-enqueued");
    Ok(requeued)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> TableSnapshot {
        TableSnapshot {
            table: "reminders".to_owned(),
            columns: vec![
                ColumnInfo {
                    name: "id".to_owned(),
                    declared_type: "INTEGER".to_owned(),
                    not_null: true,
                    default_sql: None,
                    pk_position: 1,
                },
                ColumnInfo {
                    name: "title".to_owned(),
                    declared_type: "TEXT".to_owned(),
                    not_null: false,
                    default_sql: Some("''".to_owned()),
                    pk_position: 0,
                },
                ColumnInfo {
                    name: "legacy".to_owned(),
                    declared_type: "TEXT".to_owned(),
                    not_null: false,
                    default_sql: None,
                    pk_position: 0,
                },
            ],
            autoincrement: true,
        }
    }

    #[test]
    fn snapshot_ddl_keeps_autoincrement() {
        let schema = TargetSchema::from_snapshot(&snapshot());
        assert_eq!(
            schema.create_sql("reminders__rebuild"),
            "CREATE TABLE \"reminders__rebuild\" (\"id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, \
             \"title\" TEXT DEFAULT (''), \"legacy\" TEXT)"
        );
    }

    #[test]
    fn edits_reshape_target() {
        let mut schema = TargetSchema::from_snapshot(&snapshot());
        schema.apply("reminders", &SchemaEdit::Retype("id".to_owned(), "TEXT".to_owned())).unwrap();
        schema.apply("reminders", &SchemaEdit::Drop("legacy".to_owned())).unwrap();
        schema.apply("reminders", &SchemaEdit::Require("title".to_owned())).unwrap();
        assert_eq!(
            schema.create_sql("r"),
            "CREATE TABLE \"r\" (\"id\" TEXT NOT NULL PRIMARY KEY, \"title\" TEXT NOT NULL DEFAULT (''))"
        );
    }

    #[test]
    fn unknown_column_edit_is_rejected() {
        let mut schema = TargetSchema::from_snapshot(&snapshot());
        let err = schema
            .apply("reminders", &SchemaEdit::Drop("nope".to_owned()))
            .unwrap_err();
        assert!(matches!(err, RebuildError::UnknownColumn { column, .. } if column == "nope"));
    }

    #[test]
    fn composite_key_is_a_table_constraint() {
        let snap = TableSnapshot {
            table: "note_tags".to_owned(),
            columns: vec![
                ColumnInfo {
                    name: "note_id".to_owned(),
                    declared_type: "TEXT".to_owned(),
                    not_null: true,
                    default_sql: None,
                    pk_position: 1,
                },
                ColumnInfo {
                    name: "tag".to_owned(),
                    declared_type: "TEXT".to_owned(),
                    not_null: true,
                    default_sql: None,
                    pk_position: 2,
                },
            ],
            autoincrement: false,
        };
        let sql = TargetSchema::from_snapshot(&snap).create_sql("t");
        assert!(sql.ends_with("PRIMARY KEY (\"note_id\", \"tag\"))"), "{sql}");
    }
}
