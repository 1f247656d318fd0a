use sea_orm::{FromQueryResult, TransactionTrait};
use serde_json::json;
use tracing::instrument;
use vault_db::sql::{execute, statement_with};
use vault_security::{Operation, UserId};

use super::{RepoContext, new_id, owner_lookup, owner_of, pending_ops};
use crate::domain::cipher::open_stored;
use crate::domain::{EncryptionVersion, NewReminder, RepoError, Reminder};
use crate::infra::storage::schema::{NOTE_REMINDERS, NOTES, OP_REMINDER_DELETE, OP_REMINDER_UPSERT};

const RESOURCE: &str = "reminder";

const REMINDER_COLUMNS: &str = "id, note_id, owner_user_id, title_encrypted, body_encrypted, \
     remind_at, is_active, deleted, scheduled_purge_at";

#[derive(Debug, FromQueryResult)]
struct ReminderRow {
    id: String,
    note_id: String,
    owner_user_id: Option<String>,
    title_encrypted: Option<Vec<u8>>,
    body_encrypted: Option<Vec<u8>>,
    remind_at: Option<i64>,
    is_active: bool,
    deleted: bool,
    scheduled_purge_at: Option<i64>,
}

/// Reminders hanging off the caller's notes. Ids are opaque strings minted
/// on the device.
#[derive(Debug, Clone)]
pub struct ReminderRepository {
    ctx: RepoContext,
}

impl ReminderRepository {
    #[must_use]
    pub fn new(ctx: RepoContext) -> Self {
        Self { ctx }
    }

    /// # Errors
    /// `NotFound` when the note is missing or trashed, ownership errors for a
    /// note the caller does not own, validation, cipher and driver errors.
    #[instrument(skip(self, new), fields(note_id = %new.note_id))]
    pub async fn create(&self, new: NewReminder) -> Result<Reminder, RepoError> {
        if let Some(at) = new.remind_at
            && at < 0
        {
            return Err(RepoError::validation("remind_at", "must not be before the epoch"));
        }
        let owner = self.note_owner(&new.note_id, Operation::Update).await?;
        let id = new_id();
        let now = self.ctx.clock.now_millis();
        let title = self.ctx.cipher.seal(&new.title)?;
        let body = self.ctx.cipher.seal(&new.body)?;

        let txn = self.ctx.conn.begin().await?;
        execute(
            &txn,
            statement_with(
                "INSERT INTO note_reminders (id, note_id, owner_user_id, title_encrypted, body_encrypted, \
                 encryption_version, remind_at, is_active, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                [
                    id.clone().into(),
                    new.note_id.clone().into(),
                    owner.as_str().into(),
                    title.into(),
                    body.into(),
                    EncryptionVersion::Sealed.as_i64().into(),
                    new.remind_at.into(),
                    true.into(),
                    now.into(),
                    now.into(),
                ],
            ),
        )
        .await?;
        pending_ops::enqueue(
            &txn,
            &owner,
            &id,
            OP_REMINDER_UPSERT,
            Some(&json!({ "id": id, "note_id": new.note_id })),
            now,
        )
        .await?;
        txn.commit().await?;

        Ok(Reminder {
            id,
            note_id: new.note_id,
            owner,
            title: new.title,
            body: new.body,
            remind_at: new.remind_at,
            is_active: true,
            deleted: false,
            scheduled_purge_at: None,
        })
    }

    /// # Errors
    /// `NotFound` for missing or trashed reminders, ownership, cipher and driver errors.
    #[instrument(skip(self), fields(reminder_id = %id))]
    pub async fn get(&self, id: &str) -> Result<Reminder, RepoError> {
        let row = ReminderRow::find_by_statement(statement_with(
            format!("SELECT {REMINDER_COLUMNS} FROM note_reminders WHERE id = ? AND deleted = 0"),
            [id.into()],
        ))
        .one(&self.ctx.conn)
        .await?
        .ok_or_else(|| self.ctx.missing(RESOURCE, id))?;

        let owner = owner_of(row.owner_user_id.clone());
        self.ctx
            .authz
            .verify_ownership(owner.as_ref(), RESOURCE, id, Operation::Read)
            .map_err(|e| self.ctx.deny(e))?;
        let owner = owner.ok_or_else(|| self.ctx.missing(RESOURCE, id))?;
        self.decode(row, owner)
    }

    /// Live reminders of one of the caller's notes, earliest first.
    ///
    /// # Errors
    /// Same as [`Self::create`] for the note lookup.
    #[instrument(skip(self))]
    pub async fn list_for_note(&self, note_id: &str) -> Result<Vec<Reminder>, RepoError> {
        let owner = self.note_owner(note_id, Operation::Read).await?;
        let rows = ReminderRow::find_by_statement(statement_with(
            format!(
                "SELECT {REMINDER_COLUMNS} FROM note_reminders \
                 WHERE note_id = ? AND owner_user_id = ? AND deleted = 0 ORDER BY remind_at, id"
            ),
            [note_id.into(), owner.as_str().into()],
        ))
        .all(&self.ctx.conn)
        .await?;
        rows.into_iter().map(|r| self.decode(r, owner.clone())).collect()
    }

    /// # Errors
    /// `NotFound`, ownership and driver errors.
    #[instrument(skip(self), fields(reminder_id = %id))]
    pub async fn soft_delete(&self, id: &str) -> Result<bool, RepoError> {
        let owner = owner_lookup(&self.ctx.conn, NOTE_REMINDERS, id, false)
            .await?
            .ok_or_else(|| self.ctx.missing(RESOURCE, id))?;
        self.ctx
            .authz
            .verify_ownership(owner.as_ref(), RESOURCE, id, Operation::Delete)
            .map_err(|e| self.ctx.deny(e))?;
        let owner = owner.ok_or_else(|| self.ctx.missing(RESOURCE, id))?;
        let now = self.ctx.clock.now_millis();

        let txn = self.ctx.conn.begin().await?;
        let deleted = self.ctx.lifecycle.mark_deleted(&txn, NOTE_REMINDERS, id, now).await?;
        if deleted {
            pending_ops::enqueue(&txn, &owner, id, OP_REMINDER_DELETE, None, now).await?;
        }
        txn.commit().await?;
        Ok(deleted)
    }

    async fn note_owner(&self, note_id: &str, operation: Operation) -> Result<UserId, RepoError> {
        let owner = owner_lookup(&self.ctx.conn, NOTES, note_id, true)
            .await?
            .ok_or_else(|| self.ctx.missing("note", note_id))?;
        self.ctx
            .authz
            .verify_ownership(owner.as_ref(), "note", note_id, operation)
            .map_err(|e| self.ctx.deny(e))?;
        owner.ok_or_else(|| self.ctx.missing("note", note_id))
    }

    fn decode(&self, row: ReminderRow, owner: UserId) -> Result<Reminder, RepoError> {
        Ok(Reminder {
            title: open_stored(self.ctx.cipher.as_ref(), row.title_encrypted.as_deref())?,
            body: open_stored(self.ctx.cipher.as_ref(), row.body_encrypted.as_deref())?,
            id: row.id,
            note_id: row.note_id,
            owner,
            remind_at: row.remind_at,
            is_active: row.is_active,
            deleted: row.deleted,
            scheduled_purge_at: row.scheduled_purge_at,
        })
    }
}
