use async_trait::async_trait;
use sea_orm::TransactionTrait;
use vault_db::{ApplyOutcome, IndexSpec, MigrationContext, MigrationStep, StepError};

use super::add_column_if_missing;
use crate::infra::storage::cutover::Family;
use crate::infra::storage::schema::{DELETED, ENCRYPTION_VERSION};

/// Partial index over rows that still need sealing.
#[must_use]
pub fn unsealed_index(family: Family) -> IndexSpec {
    let table = family.table();
    IndexSpec::on(table, &format!("idx_{table}_unsealed"), &["id"]).filtered(
        "encryption_version = 0 AND deleted = 0",
        &[ENCRYPTION_VERSION, DELETED],
    )
}

/// Sealed-data columns next to the plaintext ones: the start of dual-write.
pub struct EncryptionColumns;

#[async_trait]
impl MigrationStep for EncryptionColumns {
    fn version(&self) -> i64 {
        5
    }

    fn description(&self) -> &str {
        "encryption_columns"
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        let introspector = ctx.introspector();
        for family in Family::ALL {
            let mut wanted = family.sealed_columns();
            wanted.push(ENCRYPTION_VERSION.to_owned());
            if !introspector.missing_columns(family.table(), &wanted).await?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        let txn = ctx.conn().begin().await?;
        for family in Family::ALL {
            for column in family.sealed_columns() {
                add_column_if_missing(&txn, family.table(), &column, "BLOB").await?;
            }
            add_column_if_missing(&txn, family.table(), ENCRYPTION_VERSION, "INTEGER NOT NULL DEFAULT 0")
                .await?;
            // Reminders have no `deleted` column until step 6; that index waits.
            ctx.index_advisor().ensure_index(&txn, &unsealed_index(family)).await?;
        }
        txn.commit().await?;
        Ok(ApplyOutcome::Completed)
    }
}
