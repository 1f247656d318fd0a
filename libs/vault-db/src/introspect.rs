//! Read-only view of the live schema.
//!
//! Every structural migration asks the introspector before changing anything,
//! which is what makes re-running a half-applied step safe.

use std::collections::BTreeSet;

use sea_orm::{ConnectionTrait, DbErr, FromQueryResult};

use crate::sql::{scalar_i64, statement_with};

/// One column as reported by `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default_sql: Option<String>,
    /// 1-based position inside the primary key, `0` when not part of it.
    pub pk_position: i64,
}

#[derive(Debug, FromQueryResult)]
struct ColumnRow {
    name: String,
    declared_type: String,
    not_null: i64,
    default_sql: Option<String>,
    pk_position: i64,
}

impl From<ColumnRow> for ColumnInfo {
    fn from(row: ColumnRow) -> Self {
        Self {
            name: row.name,
            declared_type: row.declared_type,
            not_null: row.not_null != 0,
            default_sql: row.default_sql,
            pk_position: row.pk_position,
        }
    }
}

/// Ordered column list of a table at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    /// The table's DDL declares `AUTOINCREMENT`.
    pub autoincrement: bool,
}

impl TableSnapshot {
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn column_names(&self) -> BTreeSet<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Primary key columns in key order.
    #[must_use]
    pub fn primary_key(&self) -> Vec<&ColumnInfo> {
        let mut pk: Vec<&ColumnInfo> = self.columns.iter().filter(|c| c.pk_position > 0).collect();
        pk.sort_by_key(|c| c.pk_position);
        pk
    }
}

/// A named schema object (index or trigger) with its creation SQL.
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult)]
pub struct SchemaObject {
    pub name: String,
    pub sql: String,
}

#[derive(Debug, FromQueryResult)]
struct NameRow {
    name: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct SqlRow {
    sql: Option<String>,
}

/// Schema queries against one connection or transaction.
pub struct SchemaIntrospector<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> SchemaIntrospector<'a, C> {
    #[must_use]
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn table_exists(&self, table: &str) -> Result<bool, DbErr> {
        self.object_exists("table", table).await
    }

    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn index_exists(&self, index: &str) -> Result<bool, DbErr> {
        self.object_exists("index", index).await
    }

    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn trigger_exists(&self, trigger: &str) -> Result<bool, DbErr> {
        self.object_exists("trigger", trigger).await
    }

    async fn object_exists(&self, kind: &str, name: &str) -> Result<bool, DbErr> {
        let n = scalar_i64(
            self.conn,
            statement_with(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = ? AND name = ?",
                [kind.into(), name.into()],
            ),
        )
        .await?;
        Ok(n > 0)
    }

    /// Columns of `table`, or `None` when the table does not exist.
    ///
    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn snapshot(&self, table: &str) -> Result<Option<TableSnapshot>, DbErr> {
        let rows = ColumnRow::find_by_statement(statement_with(
            r#"SELECT name, type AS declared_type, "notnull" AS not_null,
                      dflt_value AS default_sql, pk AS pk_position
               FROM pragma_table_info(?) ORDER BY cid"#,
            [table.into()],
        ))
        .all(self.conn)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let ddl = self.table_sql(table).await?.unwrap_or_default();
        Ok(Some(TableSnapshot {
            table: table.to_owned(),
            columns: rows.into_iter().map(ColumnInfo::from).collect(),
            autoincrement: ddl.to_ascii_uppercase().contains("AUTOINCREMENT"),
        }))
    }

    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn has_column(&self, table: &str, column: &str) -> Result<bool, DbErr> {
        let n = scalar_i64(
            self.conn,
            statement_with(
                "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
                [table.into(), column.into()],
            ),
        )
        .await?;
        Ok(n > 0)
    }

    /// Which of `columns` are absent from `table`. A missing table reports all of them.
    ///
    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn missing_columns(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<String>, DbErr> {
        let present = match self.snapshot(table).await? {
            Some(s) => s.column_names(),
            None => BTreeSet::new(),
        };
        Ok(columns
            .iter()
            .filter(|c| !present.contains(c.as_str()))
            .cloned()
            .collect())
    }

    /// Column names of an index, in key order. Expression columns are omitted.
    ///
    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn index_columns(&self, index: &str) -> Result<Vec<String>, DbErr> {
        let rows = NameRow::find_by_statement(statement_with(
            "SELECT name FROM pragma_index_info(?) ORDER BY seqno",
            [index.into()],
        ))
        .all(self.conn)
        .await?;
        Ok(rows.into_iter().filter_map(|r| r.name).collect())
    }

    /// Explicitly created indexes on `table` (auto-indexes have no SQL and are skipped).
    ///
    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn indexes_on(&self, table: &str) -> Result<Vec<SchemaObject>, DbErr> {
        self.objects_on("index", table).await
    }

    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn triggers_on(&self, table: &str) -> Result<Vec<SchemaObject>, DbErr> {
        self.objects_on("trigger", table).await
    }

    async fn objects_on(&self, kind: &str, table: &str) -> Result<Vec<SchemaObject>, DbErr> {
        SchemaObject::find_by_statement(statement_with(
            "SELECT name, sql FROM sqlite_master
             WHERE type = ? AND tbl_name = ? AND sql IS NOT NULL
             ORDER BY name",
            [kind.into(), table.into()],
        ))
        .all(self.conn)
        .await
    }

    /// The `CREATE TABLE` statement stored for `table`.
    ///
    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn table_sql(&self, table: &str) -> Result<Option<String>, DbErr> {
        let row = SqlRow::find_by_statement(statement_with(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table.into()],
        ))
        .one(self.conn)
        .await?;
        Ok(row.and_then(|r| r.sql))
    }
}
