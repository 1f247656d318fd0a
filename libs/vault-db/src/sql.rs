//! Small helpers for raw SQLite statements.

use sea_orm::{ConnectionTrait, DbBackend, DbErr, Statement, Value};

/// Quote an identifier for SQLite, doubling embedded quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[must_use]
pub fn statement(sql: impl Into<String>) -> Statement {
    Statement::from_string(DbBackend::Sqlite, sql)
}

#[must_use]
pub fn statement_with<I>(sql: impl Into<String>, values: I) -> Statement
where
    I: IntoIterator<Item = Value>,
{
    Statement::from_sql_and_values(DbBackend::Sqlite, sql, values)
}

/// Execute a statement and return the affected row count.
///
/// # Errors
/// Returns the driver error unchanged.
pub async fn execute<C: ConnectionTrait>(conn: &C, stmt: Statement) -> Result<u64, DbErr> {
    Ok(conn.execute(stmt).await?.rows_affected())
}

/// First column of the first row as an integer; `0` when no row comes back.
///
/// # Errors
/// Returns the driver error, or a type error if the column is not an integer.
pub async fn scalar_i64<C: ConnectionTrait>(conn: &C, stmt: Statement) -> Result<i64, DbErr> {
    match conn.query_one(stmt).await? {
        Some(row) => Ok(row.try_get_by_index::<Option<i64>>(0)?.unwrap_or(0)),
        None => Ok(0),
    }
}

/// `SELECT COUNT(*) FROM <table> [WHERE <predicate>]`.
///
/// # Errors
/// Returns the driver error unchanged.
pub async fn count_rows<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    predicate: Option<&str>,
) -> Result<i64, DbErr> {
    let sql = match predicate {
        Some(p) => format!("SELECT COUNT(*) FROM {} WHERE {p}", quote_ident(table)),
        None => format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
    };
    scalar_i64(conn, statement(sql)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("notes"), "\"notes\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
