use async_trait::async_trait;
use vault_db::{
    ApplyOutcome, FailurePolicy, IndexAdvisor, IndexSpec, MigrationContext, MigrationStep,
    StepError,
};

use crate::infra::storage::schema::{
    ATTACHMENTS, FOLDERS, NOTE_FOLDERS, NOTE_LINKS, NOTE_REMINDERS, NOTE_TAGS, NOTE_TASKS, NOTES,
    PENDING_OPS,
};

/// Query-path indexes. Some read columns added by later steps; those are
/// skipped here and picked up when the columns arrive.
#[must_use]
pub fn performance_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::on(NOTES, "idx_notes_owner_updated", &["owner_user_id", "updated_at"]),
        IndexSpec::on(NOTES, "idx_notes_pinned", &["is_pinned", "updated_at"]),
        IndexSpec::on(NOTES, "idx_notes_trash", &["deleted", "deleted_at"]),
        IndexSpec::on(NOTE_TASKS, "idx_note_tasks_note", &["note_id", "position"]),
        IndexSpec::on(NOTE_TASKS, "idx_note_tasks_due", &["due_date"]),
        IndexSpec::on(FOLDERS, "idx_folders_parent", &["parent_id"]),
        IndexSpec::on(NOTE_FOLDERS, "idx_note_folders_folder", &["folder_id"]),
        IndexSpec::on(NOTE_TAGS, "idx_note_tags_tag", &["tag"]),
        IndexSpec::on(NOTE_LINKS, "idx_note_links_target", &["target_id"]),
        IndexSpec::on(NOTE_REMINDERS, "idx_note_reminders_note", &["note_id"]),
        IndexSpec::on(NOTE_REMINDERS, "idx_note_reminders_remind_at", &["remind_at"]),
        IndexSpec::on(ATTACHMENTS, "idx_attachments_note", &["note_id"]),
        IndexSpec::on(PENDING_OPS, "idx_pending_ops_entity", &["entity_id", "kind"]),
    ]
}

pub struct PerformanceIndexes;

#[async_trait]
impl MigrationStep for PerformanceIndexes {
    fn version(&self) -> i64 {
        3
    }

    fn description(&self) -> &str {
        "performance_indexes"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::BestEffort
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        for spec in &performance_indexes() {
            if !IndexAdvisor::is_satisfied(ctx.conn(), spec).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        ctx.index_advisor()
            .ensure_all(ctx.conn(), &performance_indexes())
            .await?;
        Ok(ApplyOutcome::Completed)
    }
}
