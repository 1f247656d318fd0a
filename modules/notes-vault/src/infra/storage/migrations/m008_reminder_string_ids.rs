use async_trait::async_trait;
use sea_orm::TransactionTrait;
use tracing::info;
use vault_db::{
    ApplyOutcome, KeyRemap, MigrationContext, MigrationStep, RebuildPlan, SchemaIntrospector,
    StepError,
};

use crate::infra::storage::schema::{NOTE_REMINDERS, NOTE_TASKS, PENDING_OPS, REMINDER_OP_KINDS};

/// Reminder ids become opaque strings so they can be minted offline on any device.
///
/// Tasks pointing at a reminder follow the new ids, and queued reminder
/// operations are re-enqueued under them.
pub struct ReminderStringIds;

fn is_integer_key(declared_type: &str) -> bool {
    declared_type.to_ascii_uppercase().contains("INT")
}

#[async_trait]
impl MigrationStep for ReminderStringIds {
    fn version(&self) -> i64 {
        8
    }

    fn description(&self) -> &str {
        "reminder_string_ids"
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        let snapshot = ctx.introspector().snapshot(NOTE_REMINDERS).await?;
        Ok(snapshot
            .as_ref()
            .and_then(|s| s.column("id"))
            .is_some_and(|c| !is_integer_key(&c.declared_type)))
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        let txn = ctx.conn().begin().await?;
        let current = SchemaIntrospector::new(&txn).snapshot(NOTE_REMINDERS).await?;
        let Some(current) = current else {
            return Err(StepError::Invalid(format!("table '{NOTE_REMINDERS}' is missing")));
        };
        if current.column("id").is_some_and(|c| !is_integer_key(&c.declared_type)) {
            return Ok(ApplyOutcome::Completed);
        }

        let plan = RebuildPlan::new(NOTE_REMINDERS).retype("id", "TEXT").remap_key(
            KeyRemap::new("id")
                .dependent(NOTE_TASKS, "reminder_id")
                .requeue(PENDING_OPS, "entity_id", "kind", &REMINDER_OP_KINDS),
        );
        let report = ctx.rebuilder().execute(&txn, &plan).await?;
        txn.commit().await?;

        info!(
            remapped = report.remapped_keys,
            requeued = report.requeued_ops,
            "Reminder ids converted to opaque strings"
        );
        Ok(ApplyOutcome::Completed)
    }
}
