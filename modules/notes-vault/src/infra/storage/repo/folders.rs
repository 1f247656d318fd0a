use sea_orm::{FromQueryResult, TransactionTrait};
use serde_json::json;
use tracing::{info, instrument};
use vault_db::sql::{execute, scalar_i64, statement_with};
use vault_security::{Operation, UserId};

use super::{RepoContext, new_id, owner_lookup, pending_ops};
use crate::domain::{Folder, FolderArena, FolderNode, RepoError};
use crate::infra::storage::schema::{FOLDERS, OP_FOLDER_UPSERT};

const RESOURCE: &str = "folder";
const MAX_NAME_CHARS: usize = 255;

#[derive(Debug, FromQueryResult)]
struct FolderRow {
    id: String,
    name: String,
    parent_id: Option<String>,
    sort_order: i64,
}

/// Folder hierarchy of the caller. Moves are checked against the whole tree
/// so a folder never ends up below itself.
#[derive(Debug, Clone)]
pub struct FolderRepository {
    ctx: RepoContext,
}

impl FolderRepository {
    #[must_use]
    pub fn new(ctx: RepoContext) -> Self {
        Self { ctx }
    }

    /// Create a folder at the end of its siblings.
    ///
    /// # Errors
    /// Validation for a blank or overlong name, `NotFound` or ownership errors
    /// for the parent, driver errors.
    #[instrument(skip(self))]
    pub async fn create(&self, name: &str, parent_id: Option<&str>) -> Result<Folder, RepoError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepoError::validation("name", "must not be empty"));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(RepoError::validation(
                "name",
                format!("must be at most {MAX_NAME_CHARS} characters"),
            ));
        }
        let owner = self.ctx.caller()?;
        if let Some(parent) = parent_id {
            self.authorize(parent, Operation::Update).await?;
        }

        let id = new_id();
        let now = self.ctx.clock.now_millis();
        let txn = self.ctx.conn.begin().await?;
        let sort_order = scalar_i64(
            &txn,
            statement_with(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM folders \
                 WHERE owner_user_id = ? AND parent_id IS ? AND deleted = 0",
                [owner.as_str().into(), parent_id.map(str::to_owned).into()],
            ),
        )
        .await?;
        execute(
            &txn,
            statement_with(
                "INSERT INTO folders (id, owner_user_id, name, parent_id, sort_order, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                [
                    id.clone().into(),
                    owner.as_str().into(),
                    name.into(),
                    parent_id.map(str::to_owned).into(),
                    sort_order.into(),
                    now.into(),
                    now.into(),
                ],
            ),
        )
        .await?;
        pending_ops::enqueue(&txn, &owner, &id, OP_FOLDER_UPSERT, Some(&json!({ "id": id })), now).await?;
        txn.commit().await?;

        Ok(Folder {
            id,
            owner,
            name: name.to_owned(),
            parent_id: parent_id.map(str::to_owned),
            sort_order,
        })
    }

    /// Re-parent a folder; `None` moves it to the top level.
    ///
    /// # Errors
    /// `NotFound` or ownership errors for either folder, [`crate::domain::FolderError::Cycle`]
    /// when `new_parent` is the folder itself or one of its descendants.
    #[instrument(skip(self))]
    pub async fn move_folder(&self, id: &str, new_parent: Option<&str>) -> Result<(), RepoError> {
        let owner = self.authorize(id, Operation::Move).await?;
        if let Some(parent) = new_parent {
            self.authorize(parent, Operation::Update).await?;
        }

        let arena = self.arena(&owner).await?;
        arena.check_move(id, new_parent)?;

        let now = self.ctx.clock.now_millis();
        let txn = self.ctx.conn.begin().await?;
        execute(
            &txn,
            statement_with(
                "UPDATE folders SET parent_id = ?, updated_at = ? WHERE id = ?",
                [new_parent.map(str::to_owned).into(), now.into(), id.into()],
            ),
        )
        .await?;
        pending_ops::enqueue(
            &txn,
            &owner,
            id,
            OP_FOLDER_UPSERT,
            Some(&json!({ "id": id, "parent_id": new_parent })),
            now,
        )
        .await?;
        txn.commit().await?;

        info!(folder_id = id, parent_id = ?new_parent, "Folder moved");
        Ok(())
    }

    /// Trash a folder. Its children surface at the top level until it is
    /// restored or purged.
    ///
    /// # Errors
    /// `NotFound`, ownership and driver errors.
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, id: &str) -> Result<bool, RepoError> {
        let owner = self.authorize(id, Operation::Delete).await?;
        let now = self.ctx.clock.now_millis();
        let txn = self.ctx.conn.begin().await?;
        let deleted = self.ctx.lifecycle.mark_deleted(&txn, FOLDERS, id, now).await?;
        if deleted {
            pending_ops::enqueue(
                &txn,
                &owner,
                id,
                OP_FOLDER_UPSERT,
                Some(&json!({ "id": id, "deleted": true })),
                now,
            )
            .await?;
        }
        txn.commit().await?;
        Ok(deleted)
    }

    /// The caller's live folders as a forest.
    ///
    /// # Errors
    /// `Unauthenticated` or the driver error.
    #[instrument(skip(self))]
    pub async fn tree(&self) -> Result<Vec<FolderNode>, RepoError> {
        let owner = self.ctx.caller()?;
        Ok(self.arena(&owner).await?.tree())
    }

    async fn arena(&self, owner: &UserId) -> Result<FolderArena, RepoError> {
        let rows = FolderRow::find_by_statement(statement_with(
            "SELECT id, name, parent_id, sort_order FROM folders WHERE owner_user_id = ? AND deleted = 0",
            [owner.as_str().into()],
        ))
        .all(&self.ctx.conn)
        .await?;
        Ok(FolderArena::from_folders(rows.into_iter().map(|r| Folder {
            id: r.id,
            owner: owner.clone(),
            name: r.name,
            parent_id: r.parent_id,
            sort_order: r.sort_order,
        })))
    }

    async fn authorize(&self, id: &str, operation: Operation) -> Result<UserId, RepoError> {
        let owner = owner_lookup(&self.ctx.conn, FOLDERS, id, true)
            .await?
            .ok_or_else(|| self.ctx.missing(RESOURCE, id))?;
        self.ctx
            .authz
            .verify_ownership(owner.as_ref(), RESOURCE, id, operation)
            .map_err(|e| self.ctx.deny(e))?;
        owner.ok_or_else(|| self.ctx.missing(RESOURCE, id))
    }
}
