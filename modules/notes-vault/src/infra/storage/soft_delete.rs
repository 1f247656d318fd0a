//! Soft delete and scheduled purge.
//!
//! A deleted row keeps `deleted = 1`, the deletion time and the time it
//! becomes eligible for permanent removal: `scheduled_purge_at = deleted_at +
//! retention`. A row with no `scheduled_purge_at` is never purged.

use std::collections::BTreeMap;
use std::time::Duration;

use sea_orm::{ConnectionTrait, DbErr, TransactionTrait, Value};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use vault_db::clock::{duration_millis, epoch_millis};
use vault_db::StepError;
use vault_db::sql::{count_rows, execute, quote_ident, statement_with};

use super::schema::{
    FOLDERS, NOTE_CHILD_TABLES, NOTE_FOLDERS, NOTE_REMINDERS, NOTE_TASKS, NOTES, PENDING_OPS,
    SOFT_DELETE_TABLES,
};

/// Retention observed in production: 30 days.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const EXPIRED: &str = "deleted = 1 AND scheduled_purge_at IS NOT NULL AND scheduled_purge_at <= ?";

#[derive(Debug, Error)]
pub enum SoftDeleteError {
    #[error("table '{0}' has no soft-delete lifecycle")]
    UnknownTable(String),

    #[error(transparent)]
    Db(#[from] DbErr),
}

impl From<SoftDeleteError> for StepError {
    fn from(err: SoftDeleteError) -> Self {
        match err {
            SoftDeleteError::Db(e) => StepError::Db(e),
            other @ SoftDeleteError::UnknownTable(_) => StepError::Invalid(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub table: String,
    /// Rows that got a `deleted_at`.
    pub backfilled: u64,
    /// Rows whose `updated_at` was unusable, approximated with the current time.
    pub anomalies: i64,
    pub scheduled: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub now_millis: i64,
    pub purged: BTreeMap<String, u64>,
    /// Dependent rows removed along with purged rows.
    pub cascaded: BTreeMap<String, u64>,
    /// References to purged rows that were cleared, keyed `table.column`.
    pub detached: BTreeMap<String, u64>,
}

impl PurgeReport {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.purged.values().sum::<u64>() + self.cascaded.values().sum::<u64>()
    }

    #[must_use]
    pub fn purged_from(&self, table: &str) -> u64 {
        self.purged.get(table).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftDeleteLifecycle {
    retention: Duration,
}

impl Default for SoftDeleteLifecycle {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl SoftDeleteLifecycle {
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self { retention }
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    #[must_use]
    pub fn retention_millis(&self) -> i64 {
        duration_millis(self.retention)
    }

    #[must_use]
    pub fn purge_at(&self, deleted_at_millis: i64) -> i64 {
        deleted_at_millis.saturating_add(self.retention_millis())
    }

    /// Hide a row and schedule its purge. Returns `false` if it was already
    /// deleted (its schedule is left alone) or does not exist.
    ///
    /// # Errors
    /// [`SoftDeleteError::UnknownTable`] or the driver error.
    pub async fn mark_deleted<C: ConnectionTrait>(
        &self,
        conn: &C,
        table: &str,
        id: &str,
        now_millis: i64,
    ) -> Result<bool, SoftDeleteError> {
        let table = checked(table)?;
        let n = execute(
            conn,
            statement_with(
                format!(
                    "UPDATE {} SET deleted = 1, deleted_at = ?, scheduled_purge_at = ?, updated_at = ?
                     WHERE id = ? AND deleted = 0",
                    quote_ident(table)
                ),
                [
                    now_millis.into(),
                    self.purge_at(now_millis).into(),
                    now_millis.into(),
                    id.into(),
                ],
            ),
        )
        .await?;
        debug!(table, id, deleted = n > 0, "Soft delete");
        Ok(n > 0)
    }

    /// Undo a soft delete before the purge gets to it.
    ///
    /// # Errors
    /// [`SoftDeleteError::UnknownTable`] or the driver error.
    pub async fn restore<C: ConnectionTrait>(
        &self,
        conn: &C,
        table: &str,
        id: &str,
        now_millis: i64,
    ) -> Result<bool, SoftDeleteError> {
        let table = checked(table)?;
        let n = execute(
            conn,
            statement_with(
                format!(
                    "UPDATE {} SET deleted = 0, deleted_at = NULL, scheduled_purge_at = NULL, updated_at = ?
                     WHERE id = ? AND deleted = 1",
                    quote_ident(table)
                ),
                [now_millis.into(), id.into()],
            ),
        )
        .await?;
        Ok(n > 0)
    }

    /// Give rows deleted before the timestamp columns existed a deletion time.
    ///
    /// `deleted_at` is approximated by `updated_at`, which is only a lower
    /// bound. Rows without a usable `updated_at` fall back to `now_millis`
    /// and are logged, not failed.
    ///
    /// # Errors
    /// [`SoftDeleteError::UnknownTable`] or the driver error.
    pub async fn backfill<C: ConnectionTrait>(
        &self,
        conn: &C,
        table: &str,
        now_millis: i64,
    ) -> Result<BackfillReport, SoftDeleteError> {
        let table = checked(table)?;
        let t = quote_ident(table);

        let anomalies = count_rows(
            conn,
            table,
            Some("deleted = 1 AND deleted_at IS NULL AND (updated_at IS NULL OR updated_at <= 0)"),
        )
        .await?;
        if anomalies > 0 {
            warn!(
                table,
                anomalies, "Deleted rows without a usable updated_at; using the current time as deleted_at"
            );
        }

        let backfilled = execute(
            conn,
            statement_with(
                format!(
                    "UPDATE {t} SET deleted_at = CASE WHEN updated_at IS NULL OR updated_at <= 0 THEN ? ELSE updated_at END
                     WHERE deleted = 1 AND deleted_at IS NULL"
                ),
                [now_millis.into()],
            ),
        )
        .await?;

        let scheduled = execute(
            conn,
            statement_with(
                format!(
                    "UPDATE {t} SET scheduled_purge_at = deleted_at + ?
                     WHERE deleted = 1 AND deleted_at IS NOT NULL AND scheduled_purge_at IS NULL"
                ),
                [self.retention_millis().into()],
            ),
        )
        .await?;

        if backfilled > 0 || scheduled > 0 {
            info!(table, backfilled, scheduled, "Soft delete timestamps backfilled");
        }
        Ok(BackfillReport {
            table: table.to_owned(),
            backfilled,
            anomalies,
            scheduled,
        })
    }

    /// Permanently remove the expired rows of one table.
    ///
    /// # Errors
    /// [`SoftDeleteError::UnknownTable`] or the driver error.
    pub async fn purge_table<C: ConnectionTrait>(
        &self,
        conn: &C,
        table: &str,
        now_millis: i64,
    ) -> Result<u64, SoftDeleteError> {
        let table = checked(table)?;
        let n = execute(
            conn,
            statement_with(
                format!("DELETE FROM {} WHERE {EXPIRED}", quote_ident(table)),
                [now_millis.into()],
            ),
        )
        .await?;
        Ok(n)
    }

    /// One purge cycle over every soft-delete table with a single `now`.
    ///
    /// Children of purged notes (tasks, reminders, tags, links, folder
    /// membership, attachments) go with them, as do memberships of purged
    /// folders. Subfolders of a purged folder move to the root and tasks lose
    /// a purged reminder. Queued sync operations for purged notes, reminders
    /// and folders are dropped. The cycle is one transaction.
    ///
    /// # Errors
    /// Returns the driver error; nothing is removed in that case.
    pub async fn purge_expired<C>(&self, conn: &C, now: OffsetDateTime) -> Result<PurgeReport, SoftDeleteError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let now_millis = epoch_millis(now);
        let mut report = PurgeReport {
            now_millis,
            ..PurgeReport::default()
        };

        let txn = conn.begin().await?;

        // Queue cleanup and reference clearing must see the rows before they go.
        let dropped_ops = execute(
            &txn,
            statement_with(stale_ops_sql(), vec![Value::from(now_millis); 4]),
        )
        .await?;
        if dropped_ops > 0 {
            report.cascaded.insert(PENDING_OPS.to_owned(), dropped_ops);
        }

        let unfiled = execute(
            &txn,
            statement_with(
                format!(
                    "DELETE FROM {} WHERE folder_id IN (SELECT id FROM {} WHERE {EXPIRED})",
                    quote_ident(NOTE_FOLDERS),
                    quote_ident(FOLDERS)
                ),
                [now_millis.into()],
            ),
        )
        .await?;
        if unfiled > 0 {
            report.cascaded.insert(NOTE_FOLDERS.to_owned(), unfiled);
        }

        let rerooted = execute(
            &txn,
            statement_with(
                format!(
                    "UPDATE {folders} SET parent_id = NULL WHERE parent_id IN (SELECT id FROM {folders} WHERE {EXPIRED})",
                    folders = quote_ident(FOLDERS)
                ),
                [now_millis.into()],
            ),
        )
        .await?;
        if rerooted > 0 {
            report.detached.insert(format!("{FOLDERS}.parent_id"), rerooted);
        }

        let unlinked = execute(
            &txn,
            statement_with(
                format!(
                    "UPDATE {} SET reminder_id = NULL WHERE reminder_id IN ({})",
                    quote_ident(NOTE_TASKS),
                    expiring_reminder_ids()
                ),
                [now_millis.into(), now_millis.into()],
            ),
        )
        .await?;
        if unlinked > 0 {
            report.detached.insert(format!("{NOTE_TASKS}.reminder_id"), unlinked);
        }

        for (child, column) in NOTE_CHILD_TABLES {
            let n = execute(
                &txn,
                statement_with(
                    format!(
                        "DELETE FROM {} WHERE {} IN (SELECT id FROM {} WHERE {EXPIRED})",
                        quote_ident(child),
                        quote_ident(column),
                        quote_ident(NOTES)
                    ),
                    [now_millis.into()],
                ),
            )
            .await?;
            if n > 0 {
                *report.cascaded.entry(child.to_owned()).or_default() += n;
            }
        }

        for table in SOFT_DELETE_TABLES {
            let n = self.purge_table(&txn, table, now_millis).await?;
            report.purged.insert(table.to_owned(), n);
        }

        txn.commit().await?;

        if report.total() > 0 {
            info!(
                now_millis,
                purged = ?report.purged,
                cascaded = ?report.cascaded,
                detached = ?report.detached,
                "Purged expired rows"
            );
        } else {
            debug!(now_millis, "Nothing to purge");
        }
        Ok(report)
    }
}

/// Ids of reminders that expire themselves or go with an expiring note. Two parameters.
fn expiring_reminder_ids() -> String {
    format!(
        "SELECT CAST(id AS TEXT) FROM {} WHERE ({EXPIRED}) OR note_id IN (SELECT id FROM {} WHERE {EXPIRED})",
        quote_ident(NOTE_REMINDERS),
        quote_ident(NOTES)
    )
}

/// Queued operations whose entity is about to be purged. Four parameters.
fn stale_ops_sql() -> String {
    format!(
        "DELETE FROM {ops} WHERE \
         (kind LIKE 'note%' AND entity_id IN (SELECT id FROM {notes} WHERE {EXPIRED})) \
         OR (kind LIKE 'reminder%' AND entity_id IN ({reminders})) \
         OR (kind LIKE 'folder%' AND entity_id IN (SELECT id FROM {folders} WHERE {EXPIRED}))",
        ops = quote_ident(PENDING_OPS),
        notes = quote_ident(NOTES),
        reminders = expiring_reminder_ids(),
        folders = quote_ident(FOLDERS),
    )
}

fn checked(table: &str) -> Result<&'static str, SoftDeleteError> {
    SOFT_DELETE_TABLES
        .into_iter()
        .find(|t| *t == table)
        .ok_or_else(|| SoftDeleteError::UnknownTable(table.to_owned()))
}
