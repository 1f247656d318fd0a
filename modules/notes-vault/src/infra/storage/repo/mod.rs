//! Owner-scoped repositories over the vault tables.
//!
//! Every read and write goes through [`OwnershipAuthorizer`]; denials are
//! shaped by the configured [`DenialDisclosure`] before they leave the crate.

use std::sync::Arc;

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, FromQueryResult};
use vault_db::Clock;
use vault_db::sql::{quote_ident, statement_with};
use vault_security::{AuthError, DenialDisclosure, OwnershipAuthorizer, UserId};

use crate::domain::{ColumnCipher, RepoError};
use crate::infra::storage::soft_delete::{SoftDeleteError, SoftDeleteLifecycle};

mod folders;
mod notes;
pub mod pending_ops;
mod reminders;

pub use folders::FolderRepository;
pub use notes::NoteRepository;
pub use reminders::ReminderRepository;

/// Collaborators shared by every repository.
#[derive(Clone)]
pub struct RepoContext {
    pub conn: DatabaseConnection,
    pub authz: OwnershipAuthorizer,
    pub cipher: Arc<dyn ColumnCipher>,
    pub clock: Arc<dyn Clock>,
    pub lifecycle: SoftDeleteLifecycle,
    pub disclosure: DenialDisclosure,
}

impl std::fmt::Debug for RepoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoContext")
            .field("lifecycle", &self.lifecycle)
            .field("disclosure", &self.disclosure)
            .finish_non_exhaustive()
    }
}

impl RepoContext {
    pub(crate) fn deny(&self, err: AuthError) -> RepoError {
        RepoError::Auth(self.disclosure.apply(err))
    }

    pub(crate) fn caller(&self) -> Result<UserId, RepoError> {
        self.authz.require_identity().map_err(|e| self.deny(e))
    }

    pub(crate) fn missing(&self, resource_type: &str, id: &str) -> RepoError {
        self.deny(self.authz.not_found(resource_type, id))
    }
}

pub(crate) fn owner_of(raw: Option<String>) -> Option<UserId> {
    raw.filter(|s| !s.is_empty()).map(UserId::new)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl From<SoftDeleteError> for RepoError {
    fn from(err: SoftDeleteError) -> Self {
        match err {
            SoftDeleteError::Db(e) => Self::Database(e),
            other @ SoftDeleteError::UnknownTable(_) => Self::validation("table", other.to_string()),
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct OwnerRow {
    owner_user_id: Option<String>,
}

/// The stored owner of row `id`: outer `None` when the row does not exist (or
/// is soft-deleted and `live_only` is set), inner `None` when it has no owner.
pub(crate) async fn owner_lookup<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    id: &str,
    live_only: bool,
) -> Result<Option<Option<UserId>>, DbErr> {
    let live = if live_only { " AND deleted = 0" } else { "" };
    let row = OwnerRow::find_by_statement(statement_with(
        format!(
            "SELECT owner_user_id FROM {} WHERE id = ?{live}",
            quote_ident(table)
        ),
        [id.into()],
    ))
    .one(conn)
    .await?;
    Ok(row.map(|r| owner_of(r.owner_user_id)))
}
