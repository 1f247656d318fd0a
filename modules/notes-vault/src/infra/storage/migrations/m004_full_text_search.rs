use async_trait::async_trait;
use tracing::info;
use vault_db::sql::{count_rows, execute, statement};
use vault_db::{ApplyOutcome, FailurePolicy, MigrationContext, MigrationStep, StepError};

use crate::infra::storage::schema::{FTS_TABLE, FTS_TRIGGERS, NOTES};

/// Trigger statements keeping `fts_notes` in step with plaintext notes.
pub const FTS_TRIGGER_SQL: [&str; 3] = [
    "CREATE TRIGGER IF NOT EXISTS trg_notes_fts_ai AFTER INSERT ON notes BEGIN
        INSERT INTO fts_notes (note_id, title, body) VALUES (new.id, new.title, new.body);
    END",
    "CREATE TRIGGER IF NOT EXISTS trg_notes_fts_au AFTER UPDATE OF title, body ON notes BEGIN
        DELETE FROM fts_notes WHERE note_id = old.id;
        INSERT INTO fts_notes (note_id, title, body) VALUES (new.id, new.title, new.body);
    END",
    "CREATE TRIGGER IF NOT EXISTS trg_notes_fts_ad AFTER DELETE ON notes BEGIN
        DELETE FROM fts_notes WHERE note_id = old.id;
    END",
];

/// FTS5 index over note titles and bodies.
///
/// Only meaningful while plaintext exists; after the encryption cutover the
/// triggers are retired and the table stays empty.
pub struct FullTextSearch;

#[async_trait]
impl MigrationStep for FullTextSearch {
    fn version(&self) -> i64 {
        4
    }

    fn description(&self) -> &str {
        "full_text_search"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::BestEffort
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        let introspector = ctx.introspector();
        if !introspector.table_exists(FTS_TABLE).await? {
            return Ok(false);
        }
        if !introspector.has_column(NOTES, "title").await? {
            return Ok(true);
        }
        for trigger in FTS_TRIGGERS {
            if !introspector.trigger_exists(trigger).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        let conn = ctx.conn();
        execute(
            conn,
            statement(format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS {FTS_TABLE} USING fts5(note_id UNINDEXED, title, body)"
            )),
        )
        .await?;

        if !ctx.introspector().has_column(NOTES, "title").await? {
            return Ok(ApplyOutcome::Completed);
        }

        for sql in FTS_TRIGGER_SQL {
            execute(conn, statement(sql)).await?;
        }

        if count_rows(conn, FTS_TABLE, None).await? == 0 {
            let indexed = execute(
                conn,
                statement(format!(
                    "INSERT INTO {FTS_TABLE} (note_id, title, body) SELECT id, title, body FROM {NOTES}"
                )),
            )
            .await?;
            info!(indexed, "Full-text index populated");
        }
        Ok(ApplyOutcome::Completed)
    }
}
