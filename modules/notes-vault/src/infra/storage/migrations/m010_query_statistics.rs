use async_trait::async_trait;
use vault_db::sql::{execute, statement};
use vault_db::{ApplyOutcome, FailurePolicy, IndexAdvisor, MigrationContext, MigrationStep, StepError};

use super::performance_indexes;

const STAT_TABLE: &str = "sqlite_stat1";

/// Planner statistics after the big rebuilds, and a last pass over indexes
/// that an earlier best-effort run may have missed.
pub struct QueryStatistics;

#[async_trait]
impl MigrationStep for QueryStatistics {
    fn version(&self) -> i64 {
        10
    }

    fn description(&self) -> &str {
        "query_statistics"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::BestEffort
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        if !ctx.introspector().table_exists(STAT_TABLE).await? {
            return Ok(false);
        }
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
        execute(ctx.conn(), statement("ANALYZE")).await?;
        Ok(ApplyOutcome::Completed)
    }
}
