//! Ordered schema steps of the vault.
//!
//! Steps are never edited once shipped; a device may be anywhere in the
//! sequence, including half-way through a step that crashed.

use std::time::Duration;

use sea_orm::{ConnectionTrait, DbErr};
use vault_db::introspect::SchemaIntrospector;
use vault_db::sql::{execute, quote_ident, statement};
use vault_db::{MigrationError, MigrationRunner, MigrationStep};

mod m001_initial_schema;
mod m002_add_owner_user_id;
mod m003_performance_indexes;
mod m004_full_text_search;
mod m005_encryption_columns;
mod m006_soft_delete_timestamps;
mod m007_owner_not_null;
mod m008_reminder_string_ids;
mod m009_encryption_cutover;
mod m010_query_statistics;

pub use m003_performance_indexes::performance_indexes;
pub use m004_full_text_search::FTS_TRIGGER_SQL;
pub use m005_encryption_columns::unsealed_index;
pub use m006_soft_delete_timestamps::purge_index;

/// Knobs some steps need at apply time.
#[derive(Debug, Clone, Copy)]
pub struct StepSettings {
    /// Used to backfill `scheduled_purge_at` for rows deleted before the column existed.
    pub retention: Duration,
}

#[must_use]
pub fn steps(settings: StepSettings) -> Vec<Box<dyn MigrationStep>> {
    vec![
        Box::new(m001_initial_schema::InitialSchema),
        Box::new(m002_add_owner_user_id::AddOwnerUserId),
        Box::new(m003_performance_indexes::PerformanceIndexes),
        Box::new(m004_full_text_search::FullTextSearch),
        Box::new(m005_encryption_columns::EncryptionColumns),
        Box::new(m006_soft_delete_timestamps::SoftDeleteTimestamps::new(settings.retention)),
        Box::new(m007_owner_not_null::OwnerNotNull),
        Box::new(m008_reminder_string_ids::ReminderStringIds),
        Box::new(m009_encryption_cutover::EncryptionCutover),
        Box::new(m010_query_statistics::QueryStatistics),
    ]
}

/// # Errors
/// Only if two steps share a version.
pub fn runner(settings: StepSettings) -> Result<MigrationRunner, MigrationError> {
    MigrationRunner::new(steps(settings))
}

/// A runner that stops after `last_version`, for bringing a store to a known
/// intermediate shape.
///
/// # Errors
/// Only if two steps share a version.
pub fn runner_through(settings: StepSettings, last_version: i64) -> Result<MigrationRunner, MigrationError> {
    MigrationRunner::new(
        steps(settings)
            .into_iter()
            .filter(|s| s.version() <= last_version)
            .collect(),
    )
}

/// `ALTER TABLE .. ADD COLUMN` unless the column is already there. Returns whether it ran.
pub(crate) async fn add_column_if_missing<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<bool, DbErr> {
    if SchemaIntrospector::new(conn).has_column(table, column).await? {
        return Ok(false);
    }
    execute(
        conn,
        statement(format!(
            "ALTER TABLE {} ADD COLUMN {} {definition}",
            quote_ident(table),
            quote_ident(column)
        )),
    )
    .await?;
    Ok(true)
}

/// True when every table has every listed column.
pub(crate) async fn all_columns_present<C: ConnectionTrait>(
    conn: &C,
    tables: &[&str],
    columns: &[&str],
) -> Result<bool, DbErr> {
    let introspector = SchemaIntrospector::new(conn);
    let wanted: Vec<String> = columns.iter().map(|c| (*c).to_owned()).collect();
    for table in tables {
        if !introspector.missing_columns(table, &wanted).await?.is_empty() {
            return Ok(false);
        }
    }
    Ok(true)
}
