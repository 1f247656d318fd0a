#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::ConnectionTrait;
use vault_db::migration_runner::{ensure_ledger, ledger_records};
use vault_db::sql::statement;
use vault_db::{
    ApplyOutcome, Db, FailurePolicy, ManualClock, MigrationContext, MigrationError,
    MigrationRunner, MigrationStep, StepError, StepOutcome,
};

/// Adds `notes.color` if missing.
struct AddColor;

#[async_trait]
impl MigrationStep for AddColor {
    fn version(&self) -> i64 {
        1
    }

    fn description(&self) -> &str {
        "add notes.color"
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(ctx.introspector().has_column("notes", "color").await?)
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        ctx.conn()
            .execute(statement("ALTER TABLE notes ADD COLUMN color TEXT"))
            .await?;
        Ok(ApplyOutcome::Completed)
    }
}

/// Waits until `notes` is empty.
struct WaitForEmpty;

#[async_trait]
impl MigrationStep for WaitForEmpty {
    fn version(&self) -> i64 {
        2
    }

    fn description(&self) -> &str {
        "wait for empty notes"
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(ctx.introspector().table_exists("notes_archive").await?)
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        let n = vault_db::sql::count_rows(ctx.conn(), "notes", None).await?;
        if n > 0 {
            return Ok(ApplyOutcome::Deferred {
                reason: format!("{n} notes remain"),
            });
        }
        ctx.conn()
            .execute(statement("CREATE TABLE notes_archive (id TEXT)"))
            .await?;
        Ok(ApplyOutcome::Completed)
    }
}

/// Claims success without doing anything.
struct Liar;

#[async_trait]
impl MigrationStep for Liar {
    fn version(&self) -> i64 {
        3
    }

    fn description(&self) -> &str {
        "liar"
    }

    async fn verify(&self, _ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(false)
    }

    async fn apply(&self, _ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        Ok(ApplyOutcome::Completed)
    }
}

fn boxed<S: MigrationStep + 'static>(step: S) -> Box<dyn MigrationStep> {
    Box::new(step)
}

async fn context() -> MigrationContext {
    let db = Db::in_memory().await.unwrap();
    db.conn()
        .execute(statement("CREATE TABLE notes (id TEXT PRIMARY KEY)"))
        .await
        .unwrap();
    MigrationContext::new(db.conn().clone()).with_clock(Arc::new(ManualClock::at_millis(
        1_700_000_000_000,
    )))
}

#[tokio::test]
async fn rerun_refreshes_ledger_without_reapplying() {
    let ctx = context().await;
    let runner = MigrationRunner::new(vec![boxed(AddColor)]).unwrap();

    let first = runner.run(&ctx).await.unwrap();
    assert_eq!(first.outcome_of(1), Some(&StepOutcome::Applied));

    let second = runner.run(&ctx).await.unwrap();
    assert_eq!(second.outcome_of(1), Some(&StepOutcome::AlreadyApplied));

    let records = ledger_records(ctx.conn()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].version, 1);
    assert_eq!(records[0].description.as_deref(), Some("add notes.color"));
    assert_eq!(records[0].applied_at.unix_timestamp(), 1_700_000_000);
}

#[tokio::test]
async fn half_applied_step_is_recorded_from_verify() {
    let ctx = context().await;
    // Structural change landed but the ledger write did not.
    ctx.conn()
        .execute(statement("ALTER TABLE notes ADD COLUMN color TEXT"))
        .await
        .unwrap();

    let runner = MigrationRunner::new(vec![boxed(AddColor)]).unwrap();
    let report = runner.run(&ctx).await.unwrap();
    assert_eq!(report.outcome_of(1), Some(&StepOutcome::AlreadyApplied));
    assert!(runner.pending_versions(&ctx).await.unwrap().is_empty());
}

#[tokio::test]
async fn deferred_step_is_retried_later() {
    let ctx = context().await;
    ctx.conn()
        .execute(statement("INSERT INTO notes (id) VALUES ('n1')"))
        .await
        .unwrap();
    let runner = MigrationRunner::new(vec![boxed(AddColor), boxed(WaitForEmpty)]).unwrap();

    let report = runner.run(&ctx).await.unwrap();
    assert_eq!(report.deferred(), vec![2]);
    assert_eq!(runner.pending_versions(&ctx).await.unwrap(), vec![2]);

    ctx.conn()
        .execute(statement("DELETE FROM notes"))
        .await
        .unwrap();
    let report = runner.run(&ctx).await.unwrap();
    assert_eq!(report.outcome_of(2), Some(&StepOutcome::Applied));
    assert!(runner.pending_versions(&ctx).await.unwrap().is_empty());
}

#[tokio::test]
async fn verification_failure_after_apply_is_fatal() {
    let ctx = context().await;
    let runner = MigrationRunner::new(vec![boxed(AddColor), boxed(Liar)]).unwrap();
    let err = runner.run(&ctx).await.unwrap_err();
    match err {
        MigrationError::StructuralMigrationFailure {
            version, source, ..
        } => {
            assert_eq!(version, 3);
            assert!(matches!(source, StepError::Verification(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Step 1 stays recorded.
    assert_eq!(runner.pending_versions(&ctx).await.unwrap(), vec![3]);
}

#[tokio::test]
async fn best_effort_liar_degrades() {
    struct SoftLiar;

    #[async_trait]
    impl MigrationStep for SoftLiar {
        fn version(&self) -> i64 {
            7
        }
        fn description(&self) -> &str {
            "soft liar"
        }
        fn policy(&self) -> FailurePolicy {
            FailurePolicy::BestEffort
        }
        async fn verify(&self, _ctx: &MigrationContext) -> Result<bool, StepError> {
            Ok(false)
        }
        async fn apply(&self, _ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
            Ok(ApplyOutcome::Completed)
        }
    }

    let ctx = context().await;
    ensure_ledger(ctx.conn()).await.unwrap();
    let runner = MigrationRunner::new(vec![boxed(SoftLiar)]).unwrap();
    let report = runner.run(&ctx).await.unwrap();
    assert_eq!(report.degraded(), vec![7]);
    assert_eq!(runner.pending_versions(&ctx).await.unwrap(), vec![7]);
}
