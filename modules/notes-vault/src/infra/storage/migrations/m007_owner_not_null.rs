use async_trait::async_trait;
use sea_orm::{TransactionTrait, Value};
use tracing::{info, warn};
use vault_db::{
    ApplyOutcome, IndexSpec, MigrationContext, MigrationStep, RebuildPlan, SchemaIntrospector,
    StepError,
};

use crate::infra::storage::schema::{
    FOLDERS, NOTE_REMINDERS, NOTES, OWNED_TABLES, OWNER_COLUMN, PENDING_OPS, note_reference,
};

/// Make `owner_user_id` NOT NULL everywhere.
///
/// Owners are backfilled from the row itself, then from the note it belongs
/// to, then from the bootstrap owner. Rows that still have no owner are
/// deleted: an ownerless row could otherwise surface for any account.
///
/// "The note it belongs to" takes the first matching note; for the tables
/// involved there is at most one, but nothing enforces that. Queued sync
/// operations resolve through the reminder, folder or note their kind names.
/// `pending_ops` is rebuilt last, so those owners are already settled.
pub struct OwnerNotNull;

fn owner_expr(table: &str) -> String {
    match note_reference(table) {
        Some(column) if table == PENDING_OPS => format!(
            "COALESCE(src.{OWNER_COLUMN}, CASE \
             WHEN src.kind LIKE 'reminder%' THEN (SELECT r.{OWNER_COLUMN} FROM {NOTE_REMINDERS} AS r \
             WHERE CAST(r.id AS TEXT) = src.{column} LIMIT 1) \
             WHEN src.kind LIKE 'folder%' THEN (SELECT f.{OWNER_COLUMN} FROM {FOLDERS} AS f \
             WHERE f.id = src.{column} LIMIT 1) \
             ELSE (SELECT n.{OWNER_COLUMN} FROM {NOTES} AS n WHERE n.id = src.{column} LIMIT 1) END, ?)"
        ),
        Some(column) if table != NOTES => format!(
            "COALESCE(src.{OWNER_COLUMN}, (SELECT n.{OWNER_COLUMN} FROM {NOTES} AS n WHERE n.id = src.{column} LIMIT 1), ?)"
        ),
        _ => format!("COALESCE(src.{OWNER_COLUMN}, ?)"),
    }
}

#[must_use]
fn plan_for(table: &str, bootstrap: Option<&str>) -> RebuildPlan {
    let expr = owner_expr(table);
    let bootstrap: Value = bootstrap.map(str::to_owned).into();
    RebuildPlan::new(table)
        .project_with(OWNER_COLUMN, &expr, vec![bootstrap.clone()])
        .filter_with(&format!("{expr} IS NOT NULL"), vec![bootstrap])
        .require(OWNER_COLUMN)
        .with_index(IndexSpec::on(table, &format!("idx_{table}_owner"), &[OWNER_COLUMN]))
}

#[async_trait]
impl MigrationStep for OwnerNotNull {
    fn version(&self) -> i64 {
        7
    }

    fn description(&self) -> &str {
        "owner_not_null"
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        let introspector = ctx.introspector();
        for table in OWNED_TABLES {
            let Some(snapshot) = introspector.snapshot(table).await? else {
                return Ok(false);
            };
            if !snapshot.column(OWNER_COLUMN).is_some_and(|c| c.not_null) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        if ctx.bootstrap_owner().is_none() {
            warn!("No bootstrap owner configured; rows without an attributable owner will be deleted");
        }

        let rebuilder = ctx.rebuilder();
        let txn = ctx.conn().begin().await?;
        for table in OWNED_TABLES {
            let done = SchemaIntrospector::new(&txn)
                .snapshot(table)
                .await?
                .and_then(|s| s.column(OWNER_COLUMN).map(|c| c.not_null))
                .unwrap_or(false);
            if done {
                continue;
            }
            let report = rebuilder.execute(&txn, &plan_for(table, ctx.bootstrap_owner())).await?;
            if report.dropped_rows > 0 {
                warn!(
                    table,
                    dropped = report.dropped_rows,
                    "Deleted rows that could not be attributed to an owner"
                );
            }
            info!(table, rows = report.rows_after, "Owner column is now required");
        }
        txn.commit().await?;
        Ok(ApplyOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_tables_inherit_from_their_note() {
        assert_eq!(owner_expr("notes"), "COALESCE(src.owner_user_id, ?)");
        assert_eq!(owner_expr("saved_searches"), "COALESCE(src.owner_user_id, ?)");
        assert!(owner_expr("note_links").contains("n.id = src.source_id"));
        assert!(owner_expr("pending_ops").contains("n.id = src.entity_id"));
    }

    #[test]
    fn queued_operations_resolve_through_the_entity_their_kind_names() {
        let expr = owner_expr("pending_ops");
        assert!(expr.contains("WHEN src.kind LIKE 'reminder%'"));
        assert!(expr.contains("CAST(r.id AS TEXT) = src.entity_id"));
        assert!(expr.contains("f.id = src.entity_id"));
        assert_eq!(expr.matches('?').count(), 1);
    }
}
