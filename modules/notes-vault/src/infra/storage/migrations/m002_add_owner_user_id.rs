use async_trait::async_trait;
use sea_orm::TransactionTrait;
use tracing::debug;
use vault_db::{ApplyOutcome, MigrationContext, MigrationStep, StepError};

use super::{add_column_if_missing, all_columns_present};
use crate::infra::storage::schema::{OWNED_TABLES, OWNER_COLUMN};

/// Nullable owner column on every user-data table. Filled and tightened by step 7.
pub struct AddOwnerUserId;

#[async_trait]
impl MigrationStep for AddOwnerUserId {
    fn version(&self) -> i64 {
        2
    }

    fn description(&self) -> &str {
        "add_owner_user_id"
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(all_columns_present(ctx.conn(), &OWNED_TABLES, &[OWNER_COLUMN]).await?)
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        let txn = ctx.conn().begin().await?;
        for table in OWNED_TABLES {
            if add_column_if_missing(&txn, table, OWNER_COLUMN, "TEXT").await? {
                debug!(table, "Added owner column");
            }
        }
        txn.commit().await?;
        Ok(ApplyOutcome::Completed)
    }
}
