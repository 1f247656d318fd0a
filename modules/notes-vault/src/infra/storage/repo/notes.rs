use sea_orm::{ConnectionTrait, DbErr, FromQueryResult, TransactionTrait, Value};
use serde_json::json;
use tracing::{debug, instrument};
use vault_db::SchemaIntrospector;
use vault_db::sql::{execute, statement_with};
use vault_security::{Operation, UserId};

use super::{RepoContext, new_id, owner_lookup, owner_of, pending_ops};
use crate::domain::cipher::open_stored;
use crate::domain::{EncryptionVersion, NewNote, Note, RepoError};
use crate::infra::storage::schema::{NOTES, OP_NOTE_DELETE, OP_NOTE_UPSERT};

const RESOURCE: &str = "note";

const NOTE_COLUMNS: &str = "id, owner_user_id, title_encrypted, body_encrypted, encryption_version, \
     is_pinned, created_at, updated_at, deleted, deleted_at, scheduled_purge_at";

#[derive(Debug, FromQueryResult)]
struct NoteRow {
    id: String,
    owner_user_id: Option<String>,
    title_encrypted: Option<Vec<u8>>,
    body_encrypted: Option<Vec<u8>>,
    encryption_version: i64,
    is_pinned: bool,
    created_at: i64,
    updated_at: Option<i64>,
    deleted: bool,
    deleted_at: Option<i64>,
    scheduled_purge_at: Option<i64>,
}

#[derive(Debug, FromQueryResult)]
struct PlainRow {
    title: String,
    body: String,
}

/// Notes of the signed-in user.
///
/// New content is always written sealed. While the plaintext columns still
/// exist they are written too, so the search triggers and plaintext readers
/// see the same content; they are read back only for rows never sealed.
#[derive(Debug, Clone)]
pub struct NoteRepository {
    ctx: RepoContext,
}

impl NoteRepository {
    #[must_use]
    pub fn new(ctx: RepoContext) -> Self {
        Self { ctx }
    }

    /// # Errors
    /// `Unauthenticated` without a signed-in user, cipher and driver errors.
    #[instrument(skip(self, new))]
    pub async fn create(&self, new: NewNote) -> Result<Note, RepoError> {
        let owner = self.ctx.caller()?;
        let id = new_id();
        let now = self.ctx.clock.now_millis();
        let title = self.ctx.cipher.seal(&new.title)?;
        let body = self.ctx.cipher.seal(&new.body)?;

        let txn = self.ctx.conn.begin().await?;
        let mut columns = String::from(
            "id, owner_user_id, title_encrypted, body_encrypted, encryption_version, is_pinned, created_at, updated_at",
        );
        let mut values: Vec<Value> = vec![
            id.clone().into(),
            owner.as_str().into(),
            title.into(),
            body.into(),
            EncryptionVersion::Sealed.as_i64().into(),
            new.is_pinned.into(),
            now.into(),
            now.into(),
        ];
        if has_plaintext(&txn).await? {
            columns.push_str(", title, body");
            values.extend([new.title.as_str().into(), new.body.as_str().into()]);
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        execute(
            &txn,
            statement_with(format!("INSERT INTO notes ({columns}) VALUES ({placeholders})"), values),
        )
        .await?;
        pending_ops::enqueue(&txn, &owner, &id, OP_NOTE_UPSERT, Some(&json!({ "id": id })), now).await?;
        txn.commit().await?;

        debug!(note_id = %id, "Note created");
        Ok(Note {
            id,
            owner,
            title: new.title,
            body: new.body,
            is_pinned: new.is_pinned,
            created_at: now,
            updated_at: Some(now),
            encryption: EncryptionVersion::Sealed,
            deleted: false,
            deleted_at: None,
            scheduled_purge_at: None,
        })
    }

    /// A live note owned by the caller.
    ///
    /// # Errors
    /// `NotFound` for missing or trashed notes, `Forbidden` (or `NotFound`
    /// when concealing) for someone else's, cipher and driver errors.
    #[instrument(skip(self), fields(note_id = %id))]
    pub async fn get(&self, id: &str) -> Result<Note, RepoError> {
        let row = self
            .find_row(id, true)
            .await?
            .ok_or_else(|| self.ctx.missing(RESOURCE, id))?;
        let owner = self.authorize(&row, Operation::Read)?;
        self.decode(row, owner).await
    }

    /// Replace title, body and pin state. The row ends up sealed.
    ///
    /// # Errors
    /// Same as [`Self::get`].
    #[instrument(skip(self, patch), fields(note_id = %id))]
    pub async fn update(&self, id: &str, patch: NewNote) -> Result<Note, RepoError> {
        let row = self
            .find_row(id, true)
            .await?
            .ok_or_else(|| self.ctx.missing(RESOURCE, id))?;
        let owner = self.authorize(&row, Operation::Update)?;
        let now = self.ctx.clock.now_millis();
        let title = self.ctx.cipher.seal(&patch.title)?;
        let body = self.ctx.cipher.seal(&patch.body)?;

        let txn = self.ctx.conn.begin().await?;
        let mut sets =
            String::from("title_encrypted = ?, body_encrypted = ?, encryption_version = ?, is_pinned = ?, updated_at = ?");
        let mut values: Vec<Value> = vec![
            title.into(),
            body.into(),
            EncryptionVersion::Sealed.as_i64().into(),
            patch.is_pinned.into(),
            now.into(),
        ];
        // keeps plaintext readers and the search index current until cutover
        if has_plaintext(&txn).await? {
            sets.push_str(", title = ?, body = ?");
            values.extend([patch.title.as_str().into(), patch.body.as_str().into()]);
        }
        values.push(id.into());
        execute(&txn, statement_with(format!("UPDATE notes SET {sets} WHERE id = ?"), values)).await?;
        pending_ops::enqueue(&txn, &owner, id, OP_NOTE_UPSERT, Some(&json!({ "id": id })), now).await?;
        txn.commit().await?;

        Ok(Note {
            title: patch.title,
            body: patch.body,
            is_pinned: patch.is_pinned,
            updated_at: Some(now),
            encryption: EncryptionVersion::Sealed,
            ..self.decode(row, owner).await?
        })
    }

    /// The caller's live notes, pinned first, most recently updated next.
    ///
    /// # Errors
    /// `Unauthenticated`, cipher and driver errors.
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<Note>, RepoError> {
        self.list_where("deleted = 0", "is_pinned DESC, updated_at DESC, id").await
    }

    /// The caller's trashed notes that have not been purged yet, soonest purge first.
    ///
    /// # Errors
    /// `Unauthenticated`, cipher and driver errors.
    #[instrument(skip(self))]
    pub async fn list_trash(&self) -> Result<Vec<Note>, RepoError> {
        self.list_where("deleted = 1", "scheduled_purge_at, id").await
    }

    /// Move a note to the trash. Returns `false` if it already was there.
    ///
    /// # Errors
    /// `NotFound`, `Forbidden`/`OwnerlessResource` and driver errors.
    #[instrument(skip(self), fields(note_id = %id))]
    pub async fn soft_delete(&self, id: &str) -> Result<bool, RepoError> {
        let owner = self.authorize_id(id, Operation::Delete).await?;
        let now = self.ctx.clock.now_millis();

        let txn = self.ctx.conn.begin().await?;
        let deleted = self.ctx.lifecycle.mark_deleted(&txn, NOTES, id, now).await?;
        if deleted {
            pending_ops::enqueue(&txn, &owner, id, OP_NOTE_DELETE, None, now).await?;
        }
        txn.commit().await?;
        Ok(deleted)
    }

    /// Take a note back out of the trash. Returns `false` if it was not trashed.
    ///
    /// # Errors
    /// `NotFound` once the note has been purged, ownership and driver errors.
    #[instrument(skip(self), fields(note_id = %id))]
    pub async fn restore(&self, id: &str) -> Result<bool, RepoError> {
        let owner = self.authorize_id(id, Operation::Restore).await?;
        let now = self.ctx.clock.now_millis();

        let txn = self.ctx.conn.begin().await?;
        let restored = self.ctx.lifecycle.restore(&txn, NOTES, id, now).await?;
        if restored {
            pending_ops::enqueue(&txn, &owner, id, OP_NOTE_UPSERT, Some(&json!({ "id": id })), now).await?;
        }
        txn.commit().await?;
        Ok(restored)
    }

    /// Trash several notes at once. Ownership of the whole batch is checked
    /// before anything changes; the first missing or foreign note fails the call.
    ///
    /// # Errors
    /// The first violation in `ids` order, or the driver error.
    #[instrument(skip(self, ids), fields(batch = ids.len()))]
    pub async fn soft_delete_many(&self, ids: &[String]) -> Result<u64, RepoError> {
        let caller = self.ctx.caller()?;
        let mut resources = Vec::with_capacity(ids.len());
        let mut first_missing = None;
        for id in ids {
            match owner_lookup(&self.ctx.conn, NOTES, id, false).await? {
                Some(owner) => resources.push((owner, id.clone())),
                None => {
                    first_missing = Some(id);
                    break;
                }
            }
        }
        // Notes ahead of a missing id are checked first so violations keep their order.
        self.ctx
            .authz
            .verify_batch_ownership(&resources, RESOURCE, Operation::Delete)
            .map_err(|e| self.ctx.deny(e))?;
        if let Some(id) = first_missing {
            return Err(self.ctx.missing(RESOURCE, id));
        }

        let now = self.ctx.clock.now_millis();
        let txn = self.ctx.conn.begin().await?;
        let mut deleted = 0;
        for id in ids {
            if self.ctx.lifecycle.mark_deleted(&txn, NOTES, id, now).await? {
                pending_ops::enqueue(&txn, &caller, id, OP_NOTE_DELETE, None, now).await?;
                deleted += 1;
            }
        }
        txn.commit().await?;
        Ok(deleted)
    }

    async fn list_where(&self, predicate: &str, order: &str) -> Result<Vec<Note>, RepoError> {
        let owner = self.ctx.caller()?;
        let rows = NoteRow::find_by_statement(statement_with(
            format!("SELECT {NOTE_COLUMNS} FROM notes WHERE owner_user_id = ? AND {predicate} ORDER BY {order}"),
            [owner.as_str().into()],
        ))
        .all(&self.ctx.conn)
        .await?;

        let mut notes = Vec::with_capacity(rows.len());
        for row in rows {
            notes.push(self.decode(row, owner.clone()).await?);
        }
        Ok(notes)
    }

    async fn find_row(&self, id: &str, live_only: bool) -> Result<Option<NoteRow>, RepoError> {
        let live = if live_only { " AND deleted = 0" } else { "" };
        Ok(NoteRow::find_by_statement(statement_with(
            format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?{live}"),
            [id.into()],
        ))
        .one(&self.ctx.conn)
        .await?)
    }

    fn authorize(&self, row: &NoteRow, operation: Operation) -> Result<UserId, RepoError> {
        let owner = owner_of(row.owner_user_id.clone());
        self.ctx
            .authz
            .verify_ownership(owner.as_ref(), RESOURCE, &row.id, operation)
            .map_err(|e| self.ctx.deny(e))?;
        owner.ok_or_else(|| self.ctx.missing(RESOURCE, &row.id))
    }

    async fn authorize_id(&self, id: &str, operation: Operation) -> Result<UserId, RepoError> {
        let owner = owner_lookup(&self.ctx.conn, NOTES, id, false)
            .await?
            .ok_or_else(|| self.ctx.missing(RESOURCE, id))?;
        self.ctx
            .authz
            .verify_ownership(owner.as_ref(), RESOURCE, id, operation)
            .map_err(|e| self.ctx.deny(e))?;
        owner.ok_or_else(|| self.ctx.missing(RESOURCE, id))
    }

    async fn decode(&self, row: NoteRow, owner: UserId) -> Result<Note, RepoError> {
        let encryption = EncryptionVersion::from_i64(row.encryption_version);
        let (title, body) = match encryption {
            EncryptionVersion::Sealed => (
                open_stored(self.ctx.cipher.as_ref(), row.title_encrypted.as_deref())?,
                open_stored(self.ctx.cipher.as_ref(), row.body_encrypted.as_deref())?,
            ),
            EncryptionVersion::Plaintext => self.plaintext(&row.id).await?,
        };
        Ok(Note {
            id: row.id,
            owner,
            title,
            body,
            is_pinned: row.is_pinned,
            created_at: row.created_at,
            updated_at: row.updated_at,
            encryption,
            deleted: row.deleted,
            deleted_at: row.deleted_at,
            scheduled_purge_at: row.scheduled_purge_at,
        })
    }

    /// Legacy plaintext of a never-sealed row; empty once the columns are gone.
    async fn plaintext(&self, id: &str) -> Result<(String, String), RepoError> {
        if !has_plaintext(&self.ctx.conn).await? {
            return Ok((String::new(), String::new()));
        }
        let row = PlainRow::find_by_statement(statement_with("SELECT title, body FROM notes WHERE id = ?", [id.into()]))
            .one(&self.ctx.conn)
            .await?;
        Ok(row.map(|r| (r.title, r.body)).unwrap_or_default())
    }
}

async fn has_plaintext<C: ConnectionTrait>(conn: &C) -> Result<bool, DbErr> {
    SchemaIntrospector::new(conn).has_column(NOTES, "title").await
}
