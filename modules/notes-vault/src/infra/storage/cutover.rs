//! Plaintext to sealed-only cutover.
//!
//! Each table family walks `Unmigrated -> DualWrite -> Verified ->
//! PlaintextDropped`. Sealing happens lazily, row by row, while both column
//! sets exist. The cutover itself is all-or-nothing across families: it only
//! runs when no live row anywhere is still plaintext, and once it has dropped
//! the plaintext columns there is no way back short of an external backup.

use std::collections::BTreeMap;
use std::fmt;

use sea_orm::{ConnectionTrait, DbErr, FromQueryResult, TransactionTrait, Value};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use vault_db::sql::{count_rows, execute, quote_ident, statement, statement_with};
use vault_db::{
    MigrationObserver, RebuildError, RebuildPlan, RebuildReport, SchemaIntrospector, StepError,
    TableRebuilder, TableSnapshot, TracingObserver,
};

use super::schema::{
    DELETED, ENCRYPTION_VERSION, FTS_TABLE, FTS_TRIGGERS, NOTE_REMINDERS, NOTE_TASKS, NOTES,
    TEMPLATES,
};
use crate::domain::cipher::{CipherError, ColumnCipher};
use crate::domain::model::EncryptionVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Notes,
    Tasks,
    Templates,
    Reminders,
}

impl Family {
    pub const ALL: [Family; 4] = [Self::Notes, Self::Tasks, Self::Templates, Self::Reminders];

    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Notes => NOTES,
            Self::Tasks => NOTE_TASKS,
            Self::Templates => TEMPLATES,
            Self::Reminders => NOTE_REMINDERS,
        }
    }

    /// Plaintext columns that get a sealed twin.
    #[must_use]
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Notes | Self::Templates | Self::Reminders => &["title", "body"],
            Self::Tasks => &["content"],
        }
    }

    #[must_use]
    pub fn sealed_columns(self) -> Vec<String> {
        self.fields().iter().map(|f| sealed_column(f)).collect()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::Tasks => "tasks",
            Self::Templates => "templates",
            Self::Reminders => "reminders",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[must_use]
pub fn sealed_column(field: &str) -> String {
    format!("{field}_encrypted")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CutoverState {
    /// No sealed columns yet.
    Unmigrated,
    /// Both column sets exist and live plaintext rows remain.
    DualWrite,
    /// Both column sets exist and every live row is sealed.
    Verified,
    /// Plaintext columns are gone.
    PlaintextDropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CutoverOutcome {
    Completed {
        families: Vec<Family>,
        reports: Vec<RebuildReport>,
    },
    /// Every family had already been cut over.
    AlreadyDropped,
    /// Live plaintext rows remain; nothing was changed.
    Aborted { pending: BTreeMap<Family, i64> },
}

#[derive(Debug, Error)]
pub enum CutoverError {
    #[error("{family} has no encryption columns yet")]
    Unmigrated { family: Family },

    #[error("{family} row '{id}' does not exist")]
    RowNotFound { family: Family, id: String },

    #[error("{family} row '{id}' is sealed and cannot go back to plaintext")]
    Regression { family: Family, id: String },

    #[error("{family} has no field '{field}'")]
    UnknownField { family: Family, field: String },

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Rebuild(#[from] RebuildError),

    #[error(transparent)]
    Db(#[from] DbErr),
}

impl From<CutoverError> for StepError {
    fn from(err: CutoverError) -> Self {
        match err {
            CutoverError::Db(e) => StepError::Db(e),
            CutoverError::Rebuild(e) => StepError::Rebuild(e),
            other => StepError::Invalid(other.to_string()),
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct IdRow {
    id: String,
}

#[derive(Debug, FromQueryResult)]
struct VersionRow {
    encryption_version: i64,
}

pub struct EncryptionCutoverTracker<'a, C> {
    conn: &'a C,
    observer: &'a dyn MigrationObserver,
}

impl<'a, C> EncryptionCutoverTracker<'a, C>
where
    C: ConnectionTrait + TransactionTrait,
{
    #[must_use]
    pub fn new(conn: &'a C) -> Self {
        Self {
            conn,
            observer: &TracingObserver,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: &'a dyn MigrationObserver) -> Self {
        self.observer = observer;
        self
    }

    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn state(&self, family: Family) -> Result<CutoverState, CutoverError> {
        let Some(snapshot) = self.snapshot(family).await? else {
            return Ok(CutoverState::Unmigrated);
        };
        if !has_sealed_columns(family, &snapshot) {
            return Ok(CutoverState::Unmigrated);
        }
        if !family.fields().iter().any(|f| snapshot.has_column(f)) {
            return Ok(CutoverState::PlaintextDropped);
        }
        if self.pending_in(family, &snapshot).await? == 0 {
            Ok(CutoverState::Verified)
        } else {
            Ok(CutoverState::DualWrite)
        }
    }

    /// Live rows still in plaintext. Before the encryption columns exist every
    /// row counts.
    ///
    /// # Errors
    /// Returns the driver error unchanged.
    pub async fn pending_rows(&self, family: Family) -> Result<i64, CutoverError> {
        match self.snapshot(family).await? {
            Some(snapshot) => self.pending_in(family, &snapshot).await,
            None => Ok(0),
        }
    }

    /// Up to `limit` ids of live plaintext rows.
    ///
    /// # Errors
    /// [`CutoverError::Unmigrated`] before the encryption columns exist.
    pub async fn unsealed_ids(&self, family: Family, limit: u32) -> Result<Vec<String>, CutoverError> {
        let snapshot = self.migrated_snapshot(family).await?;
        let rows = IdRow::find_by_statement(statement_with(
            format!(
                "SELECT CAST(id AS TEXT) AS id FROM {} WHERE {} ORDER BY id LIMIT ?",
                quote_ident(family.table()),
                unsealed_predicate(&snapshot)
            ),
            [i64::from(limit).into()],
        ))
        .all(self.conn)
        .await?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    /// Store sealed values for one row and mark it sealed.
    ///
    /// # Errors
    /// [`CutoverError::UnknownField`] for a field outside the family,
    /// [`CutoverError::RowNotFound`] when no row has `id`.
    pub async fn seal_row(
        &self,
        family: Family,
        id: &str,
        sealed: &[(&str, Vec<u8>)],
    ) -> Result<(), CutoverError> {
        let mut sets = Vec::with_capacity(sealed.len() + 1);
        let mut values: Vec<Value> = Vec::with_capacity(sealed.len() + 1);
        for (field, bytes) in sealed {
            if !family.fields().contains(field) {
                return Err(CutoverError::UnknownField {
                    family,
                    field: (*field).to_owned(),
                });
            }
            sets.push(format!("{} = ?", quote_ident(&sealed_column(field))));
            values.push(bytes.clone().into());
        }
        sets.push(format!("{ENCRYPTION_VERSION} = 1"));
        values.push(id.into());

        let n = execute(
            self.conn,
            statement_with(
                format!(
                    "UPDATE {} SET {} WHERE id = ?",
                    quote_ident(family.table()),
                    sets.join(", ")
                ),
                values,
            ),
        )
        .await?;
        if n == 0 {
            return Err(CutoverError::RowNotFound {
                family,
                id: id.to_owned(),
            });
        }
        Ok(())
    }

    /// Set a row's encryption version. Moving a sealed row back is refused.
    ///
    /// # Errors
    /// [`CutoverError::Regression`] for 1 -> 0, [`CutoverError::RowNotFound`].
    pub async fn set_version(
        &self,
        family: Family,
        id: &str,
        version: EncryptionVersion,
    ) -> Result<(), CutoverError> {
        let current = VersionRow::find_by_statement(statement_with(
            format!(
                "SELECT {ENCRYPTION_VERSION} AS encryption_version FROM {} WHERE id = ?",
                quote_ident(family.table())
            ),
            [id.into()],
        ))
        .one(self.conn)
        .await?
        .ok_or_else(|| CutoverError::RowNotFound {
            family,
            id: id.to_owned(),
        })?;

        let current = EncryptionVersion::from_i64(current.encryption_version);
        if version < current {
            return Err(CutoverError::Regression {
                family,
                id: id.to_owned(),
            });
        }
        execute(
            self.conn,
            statement_with(
                format!(
                    "UPDATE {} SET {ENCRYPTION_VERSION} = ? WHERE id = ?",
                    quote_ident(family.table())
                ),
                [version.as_i64().into(), id.into()],
            ),
        )
        .await?;
        Ok(())
    }

    /// Seal up to `batch` live plaintext rows with `cipher`. Returns how many
    /// were sealed; zero once the family is done or its plaintext is gone.
    ///
    /// # Errors
    /// The first cipher or driver error; rows sealed before it stay sealed.
    pub async fn seal_pending(
        &self,
        cipher: &dyn ColumnCipher,
        family: Family,
        batch: u32,
    ) -> Result<u64, CutoverError> {
        let snapshot = self.migrated_snapshot(family).await?;
        if !family.fields().iter().all(|f| snapshot.has_column(f)) {
            return Ok(0);
        }

        let columns = family
            .fields()
            .iter()
            .map(|f| quote_ident(f))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = self
            .conn
            .query_all(statement_with(
                format!(
                    "SELECT CAST(id AS TEXT) AS id, {columns} FROM {} WHERE {} ORDER BY id LIMIT ?",
                    quote_ident(family.table()),
                    unsealed_predicate(&snapshot)
                ),
                [i64::from(batch).into()],
            ))
            .await?;

        let mut sealed_count: u64 = 0;
        for row in rows {
            let id: String = row.try_get("", "id")?;
            let mut sealed = Vec::with_capacity(family.fields().len());
            for field in family.fields() {
                let plain: Option<String> = row.try_get("", field)?;
                sealed.push((*field, cipher.seal(plain.as_deref().unwrap_or_default())?));
            }
            self.seal_row(family, &id, &sealed).await?;
            sealed_count += 1;
        }
        debug!(%family, sealed = sealed_count, "Sealed pending rows");
        Ok(sealed_count)
    }

    /// Drop plaintext columns for every family, or for none.
    ///
    /// Soft-deleted rows that were never sealed keep an empty sealed value;
    /// their content does not survive the cutover.
    ///
    /// # Errors
    /// [`CutoverError::Unmigrated`] if a family has no encryption columns,
    /// otherwise rebuild and driver errors. On error nothing is dropped.
    pub async fn cutover(&self) -> Result<CutoverOutcome, CutoverError> {
        let mut todo = Vec::new();
        let mut pending = BTreeMap::new();
        for family in Family::ALL {
            match self.state(family).await? {
                CutoverState::Unmigrated => return Err(CutoverError::Unmigrated { family }),
                CutoverState::PlaintextDropped => {}
                CutoverState::Verified => todo.push(family),
                CutoverState::DualWrite => {
                    pending.insert(family, self.pending_rows(family).await?);
                    todo.push(family);
                }
            }
        }

        if !pending.is_empty() {
            info!(?pending, "Encryption cutover postponed: unsealed rows remain");
            return Ok(CutoverOutcome::Aborted { pending });
        }
        if todo.is_empty() {
            return Ok(CutoverOutcome::AlreadyDropped);
        }
        self.drop_plaintext(todo).await
    }

    /// Rebuild `todo` without plaintext, re-counting unsealed rows inside the
    /// transaction first so a row written since the state check is never
    /// rebuilt into an empty sealed value.
    async fn drop_plaintext(&self, todo: Vec<Family>) -> Result<CutoverOutcome, CutoverError> {
        let txn = self.conn.begin().await?;
        let mut pending = BTreeMap::new();
        for family in &todo {
            let Some(snapshot) = SchemaIntrospector::new(&txn).snapshot(family.table()).await? else {
                continue;
            };
            let rows = count_pending(&txn, *family, &snapshot).await?;
            if rows > 0 {
                pending.insert(*family, rows);
            }
        }
        if !pending.is_empty() {
            txn.rollback().await?;
            info!(?pending, "Encryption cutover postponed: rows were written unsealed meanwhile");
            return Ok(CutoverOutcome::Aborted { pending });
        }

        let rebuilder = TableRebuilder::new(self.observer);
        let mut reports = Vec::with_capacity(todo.len());
        for family in &todo {
            reports.push(rebuilder.execute(&txn, &drop_plaintext_plan(*family)).await?);
        }
        if todo.contains(&Family::Notes) && SchemaIntrospector::new(&txn).table_exists(FTS_TABLE).await? {
            let cleared = execute(&txn, statement(format!("DELETE FROM {}", quote_ident(FTS_TABLE)))).await?;
            debug!(cleared, "Full-text index cleared");
        }
        txn.commit().await?;

        info!(families = ?todo, "Plaintext columns dropped");
        Ok(CutoverOutcome::Completed {
            families: todo,
            reports,
        })
    }

    async fn snapshot(&self, family: Family) -> Result<Option<TableSnapshot>, CutoverError> {
        Ok(SchemaIntrospector::new(self.conn).snapshot(family.table()).await?)
    }

    async fn migrated_snapshot(&self, family: Family) -> Result<TableSnapshot, CutoverError> {
        match self.snapshot(family).await? {
            Some(s) if has_sealed_columns(family, &s) => Ok(s),
            _ => Err(CutoverError::Unmigrated { family }),
        }
    }

    async fn pending_in(&self, family: Family, snapshot: &TableSnapshot) -> Result<i64, CutoverError> {
        count_pending(self.conn, family, snapshot).await
    }
}

async fn count_pending<C: ConnectionTrait>(
    conn: &C,
    family: Family,
    snapshot: &TableSnapshot,
) -> Result<i64, CutoverError> {
    let predicate = if snapshot.has_column(ENCRYPTION_VERSION) {
        Some(unsealed_predicate(snapshot))
    } else if snapshot.has_column(DELETED) {
        Some("deleted = 0".to_owned())
    } else {
        None
    };
    Ok(count_rows(conn, family.table(), predicate.as_deref()).await?)
}

fn has_sealed_columns(family: Family, snapshot: &TableSnapshot) -> bool {
    snapshot.has_column(ENCRYPTION_VERSION)
        && family.sealed_columns().iter().all(|c| snapshot.has_column(c))
}

fn unsealed_predicate(snapshot: &TableSnapshot) -> String {
    if snapshot.has_column(DELETED) {
        "encryption_version = 0 AND deleted = 0".to_owned()
    } else {
        "encryption_version = 0".to_owned()
    }
}

fn drop_plaintext_plan(family: Family) -> RebuildPlan {
    let mut plan = RebuildPlan::new(family.table());
    for field in family.fields() {
        let sealed = sealed_column(field);
        plan = plan
            .drop_column(field)
            .project(&sealed, &format!("COALESCE(src.{}, X'')", quote_ident(&sealed)))
            .require(&sealed);
    }
    if family == Family::Notes {
        for trigger in FTS_TRIGGERS {
            plan = plan.retire_trigger(trigger);
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::storage::migrations::{self, StepSettings};
    use crate::infra::storage::soft_delete::DEFAULT_RETENTION;
    use vault_db::{Db, MigrationContext};

    #[test]
    fn families_map_to_tables_and_sealed_columns() {
        assert_eq!(Family::Tasks.table(), "note_tasks");
        assert_eq!(Family::Tasks.sealed_columns(), vec!["content_encrypted"]);
        assert_eq!(
            Family::Reminders.sealed_columns(),
            vec!["title_encrypted", "body_encrypted"]
        );
    }

    #[test]
    fn states_are_ordered_along_the_cutover() {
        assert!(CutoverState::Unmigrated < CutoverState::DualWrite);
        assert!(CutoverState::Verified < CutoverState::PlaintextDropped);
    }

    #[tokio::test]
    async fn rows_written_unsealed_after_the_state_check_stop_the_rebuild() {
        let db = Db::in_memory().await.unwrap();
        let settings = StepSettings {
            retention: DEFAULT_RETENTION,
        };
        migrations::runner_through(settings, 8)
            .unwrap()
            .run(&MigrationContext::new(db.conn().clone()))
            .await
            .unwrap();
        let tracker = EncryptionCutoverTracker::new(db.conn());
        assert_eq!(tracker.state(Family::Notes).await.unwrap(), CutoverState::Verified);

        // Arrives between the state check and the rebuild.
        execute(
            db.conn(),
            statement(
                "INSERT INTO notes (id, owner_user_id, title, body, created_at) \
                 VALUES ('late', 'alice', 'written late', 'plain', 0)",
            ),
        )
        .await
        .unwrap();

        let outcome = tracker.drop_plaintext(Family::ALL.to_vec()).await.unwrap();
        assert_eq!(
            outcome,
            CutoverOutcome::Aborted {
                pending: BTreeMap::from([(Family::Notes, 1)])
            }
        );
        let notes = SchemaIntrospector::new(db.conn()).snapshot(NOTES).await.unwrap().unwrap();
        assert!(notes.has_column("title"));
        assert_eq!(tracker.state(Family::Tasks).await.unwrap(), CutoverState::Verified);
    }
}
