use std::time::Duration;

use async_trait::async_trait;
use sea_orm::TransactionTrait;
use tracing::warn;
use vault_db::sql::count_rows;
use vault_db::{ApplyOutcome, IndexAdvisor, IndexSpec, MigrationContext, MigrationStep, StepError};

use super::{add_column_if_missing, all_columns_present, performance_indexes, unsealed_index};
use crate::infra::storage::cutover::Family;
use crate::infra::storage::schema::{
    DELETED, DELETED_AT, NOTE_REMINDERS, SCHEDULED_PURGE_AT, SOFT_DELETE_TABLES,
};
use crate::infra::storage::soft_delete::SoftDeleteLifecycle;

/// Index the purge job scans.
#[must_use]
pub fn purge_index(table: &str) -> IndexSpec {
    IndexSpec::on(table, &format!("idx_{table}_purge"), &[SCHEDULED_PURGE_AT])
        .filtered("deleted = 1", &[DELETED])
}

/// Deletion timestamps plus the backfill for rows deleted before they existed.
pub struct SoftDeleteTimestamps {
    lifecycle: SoftDeleteLifecycle,
}

impl SoftDeleteTimestamps {
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            lifecycle: SoftDeleteLifecycle::new(retention),
        }
    }
}

#[async_trait]
impl MigrationStep for SoftDeleteTimestamps {
    fn version(&self) -> i64 {
        6
    }

    fn description(&self) -> &str {
        "soft_delete_timestamps"
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        let conn = ctx.conn();
        if !all_columns_present(conn, &SOFT_DELETE_TABLES, &[DELETED, DELETED_AT, SCHEDULED_PURGE_AT]).await? {
            return Ok(false);
        }
        for table in SOFT_DELETE_TABLES {
            let unscheduled = count_rows(conn, table, Some("deleted = 1 AND scheduled_purge_at IS NULL")).await?;
            if unscheduled > 0 || !IndexAdvisor::is_satisfied(conn, &purge_index(table)).await? {
                return Ok(false);
            }
        }
        for family in Family::ALL {
            if !IndexAdvisor::is_satisfied(conn, &unsealed_index(family)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        let now = ctx.clock().now_millis();
        let advisor = ctx.index_advisor();
        let txn = ctx.conn().begin().await?;

        add_column_if_missing(&txn, NOTE_REMINDERS, DELETED, "BOOLEAN NOT NULL DEFAULT FALSE").await?;
        for table in SOFT_DELETE_TABLES {
            add_column_if_missing(&txn, table, DELETED_AT, "INTEGER").await?;
            add_column_if_missing(&txn, table, SCHEDULED_PURGE_AT, "INTEGER").await?;
            self.lifecycle.backfill(&txn, table, now).await?;
            advisor.ensure_index(&txn, &purge_index(table)).await?;
        }
        for family in Family::ALL {
            advisor.ensure_index(&txn, &unsealed_index(family)).await?;
        }
        txn.commit().await?;

        // Indexes from step 3 that were waiting on these columns.
        if let Err(e) = advisor.ensure_all(ctx.conn(), &performance_indexes()).await {
            warn!(error = %e, "Could not create deferred performance indexes");
        }
        Ok(ApplyOutcome::Completed)
    }
}
