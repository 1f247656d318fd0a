//! Background purge of expired soft-deleted rows.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vault_db::Clock;

use crate::infra::storage::soft_delete::{PurgeReport, SoftDeleteError, SoftDeleteLifecycle};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Runs [`SoftDeleteLifecycle::purge_expired`] on a fixed period.
///
/// The first cycle runs immediately. A cycle that overruns the period makes
/// the next one skip; a failed cycle is logged and the job keeps going.
pub struct PurgeScheduler {
    conn: DatabaseConnection,
    lifecycle: SoftDeleteLifecycle,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl std::fmt::Debug for PurgeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgeScheduler")
            .field("lifecycle", &self.lifecycle)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl PurgeScheduler {
    #[must_use]
    pub fn new(
        conn: DatabaseConnection,
        lifecycle: SoftDeleteLifecycle,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            conn,
            lifecycle,
            clock,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One purge cycle at the clock's current time.
    ///
    /// # Errors
    /// Returns the lifecycle error; nothing is removed in that case.
    pub async fn run_once(&self) -> Result<PurgeReport, SoftDeleteError> {
        self.lifecycle.purge_expired(&self.conn, self.clock.now()).await
    }

    /// Loop until `cancel` fires. A cycle in flight finishes first.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.interval, "Purge job started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.run_once().await {
                Ok(report) => debug!(purged = report.total(), "Purge cycle finished"),
                Err(e) => warn!(error = %e, "Purge cycle failed; retrying next tick"),
            }
        }

        info!("Purge job stopped");
    }

    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
