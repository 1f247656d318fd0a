use async_trait::async_trait;
use vault_db::{ApplyOutcome, MigrationContext, MigrationStep, StepError};

use crate::infra::storage::cutover::{CutoverOutcome, CutoverState, EncryptionCutoverTracker, Family};

/// Drop plaintext columns once every live row is sealed. Until then the step
/// defers and is retried on the next launch.
pub struct EncryptionCutover;

#[async_trait]
impl MigrationStep for EncryptionCutover {
    fn version(&self) -> i64 {
        9
    }

    fn description(&self) -> &str {
        "encryption_cutover"
    }

    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        let tracker = EncryptionCutoverTracker::new(ctx.conn());
        for family in Family::ALL {
            if tracker.state(family).await? != CutoverState::PlaintextDropped {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
        let tracker = EncryptionCutoverTracker::new(ctx.conn()).with_observer(ctx.observer());
        match tracker.cutover().await? {
            CutoverOutcome::Completed { .. } | CutoverOutcome::AlreadyDropped => Ok(ApplyOutcome::Completed),
            CutoverOutcome::Aborted { pending } => {
                let counts = pending
                    .iter()
                    .map(|(family, n)| format!("{family}={n}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(ApplyOutcome::Deferred {
                    reason: format!("unsealed rows remain ({counts})"),
                })
            }
        }
    }
}
