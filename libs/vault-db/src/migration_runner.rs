//! Versioned migration runner.
//!
//! Steps are declared by the owning module and run in ascending version order.
//! The runner never trusts the ledger alone: each step first asks `verify`
//! whether its end state already holds, which makes it safe to re-run after a
//! crash between a structural change and its ledger write.
//!
//! # Ledger
//!
//! Applied versions live in `schema_versions(version, applied_at, description)`.
//! A version is applied iff its row exists. Re-entrant runs refresh the row
//! with `INSERT OR REPLACE`.
//!
//! # Failure policy
//!
//! Every step declares a [`FailurePolicy`]. A failing `Fatal` step aborts the
//! run with [`MigrationError::StructuralMigrationFailure`]; a failing
//! `BestEffort` step is reported as [`StepOutcome::Degraded`] and the run moves on.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, FromQueryResult};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::index_advisor::IndexAdvisor;
use crate::introspect::SchemaIntrospector;
use crate::observer::{MigrationObserver, TracingObserver};
use crate::rebuild::{RebuildError, TableRebuilder};
use crate::sql::{statement, statement_with};

pub const LEDGER_TABLE: &str = "schema_versions";

/// Errors raised by a single step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Db(#[from] DbErr),

    #[error(transparent)]
    Rebuild(#[from] RebuildError),

    /// `apply` reported success but `verify` still does not hold.
    #[error("post-apply verification failed: {0}")]
    Verification(String),

    #[error("{0}")]
    Invalid(String),
}

/// Errors that stop a migration run.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {version} ('{description}') failed: {source}")]
    StructuralMigrationFailure {
        version: i64,
        description: String,
        source: StepError,
    },

    #[error("duplicate migration version {version}")]
    DuplicateVersion { version: i64 },

    #[error("migration ledger error: {source}")]
    Ledger { source: DbErr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Failure aborts the run.
    Fatal,
    /// Failure is logged and the run continues.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Completed,
    /// Preconditions not met yet; retry on a later run.
    Deferred { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    AlreadyApplied,
    Deferred { reason: String },
    Degraded { error: String },
}

impl StepOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already_applied",
            Self::Deferred { .. } => "deferred",
            Self::Degraded { .. } => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub version: i64,
    pub description: String,
    pub outcome: StepOutcome,
}

/// Per-step outcomes of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub steps: Vec<StepReport>,
}

impl MigrationReport {
    #[must_use]
    pub fn outcome_of(&self, version: i64) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.version == version)
            .map(|s| &s.outcome)
    }

    #[must_use]
    pub fn applied(&self) -> Vec<i64> {
        self.versions_where(|o| matches!(o, StepOutcome::Applied))
    }

    #[must_use]
    pub fn deferred(&self) -> Vec<i64> {
        self.versions_where(|o| matches!(o, StepOutcome::Deferred { .. }))
    }

    #[must_use]
    pub fn degraded(&self) -> Vec<i64> {
        self.versions_where(|o| matches!(o, StepOutcome::Degraded { .. }))
    }

    fn versions_where(&self, pred: impl Fn(&StepOutcome) -> bool) -> Vec<i64> {
        self.steps
            .iter()
            .filter(|s| pred(&s.outcome))
            .map(|s| s.version)
            .collect()
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersionRecord {
    pub version: i64,
    pub applied_at: OffsetDateTime,
    pub description: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct LedgerRow {
    version: i64,
    applied_at: String,
    description: Option<String>,
}

/// What a step gets to work with.
pub struct MigrationContext {
    conn: DatabaseConnection,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn MigrationObserver>,
    bootstrap_owner: Option<String>,
}

impl MigrationContext {
    #[must_use]
    pub fn new(conn: DatabaseConnection) -> Self {
        Self {
            conn,
            clock: Arc::new(SystemClock),
            observer: Arc::new(TracingObserver),
            bootstrap_owner: None,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Owner assigned to rows that cannot be attributed any other way.
    #[must_use]
    pub fn with_bootstrap_owner(mut self, owner: Option<String>) -> Self {
        self.bootstrap_owner = owner;
        self
    }

    #[must_use]
    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[must_use]
    pub fn observer(&self) -> &dyn MigrationObserver {
        self.observer.as_ref()
    }

    #[must_use]
    pub fn bootstrap_owner(&self) -> Option<&str> {
        self.bootstrap_owner.as_deref()
    }

    #[must_use]
    pub fn introspector(&self) -> SchemaIntrospector<'_, DatabaseConnection> {
        SchemaIntrospector::new(&self.conn)
    }

    #[must_use]
    pub fn index_advisor(&self) -> IndexAdvisor<'_> {
        IndexAdvisor::new(self.observer.as_ref())
    }

    #[must_use]
    pub fn rebuilder(&self) -> TableRebuilder<'_> {
        TableRebuilder::new(self.observer.as_ref())
    }
}

/// One versioned schema change.
///
/// `verify` must be a pure read and must be true exactly when the step's end
/// state holds. `apply` must tolerate partial prior application.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    fn version(&self) -> i64;

    fn description(&self) -> &str;

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    /// # Errors
    /// Returns [`StepError`] if the end state cannot be inspected.
    async fn verify(&self, ctx: &MigrationContext) -> Result<bool, StepError>;

    /// # Errors
    /// Returns [`StepError`] on failure; the step's policy decides what the run does next.
    async fn apply(&self, ctx: &MigrationContext) -> Result<ApplyOutcome, StepError>;
}

pub struct MigrationRunner {
    steps: Vec<Box<dyn MigrationStep>>,
}

impl std::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("versions", &self.versions())
            .finish()
    }
}

impl MigrationRunner {
    /// Sort `steps` by version.
    ///
    /// # Errors
    /// Returns [`MigrationError::DuplicateVersion`] if two steps share a version.
    pub fn new(mut steps: Vec<Box<dyn MigrationStep>>) -> Result<Self, MigrationError> {
        let mut seen = BTreeSet::new();
        for step in &steps {
            if !seen.insert(step.version()) {
                return Err(MigrationError::DuplicateVersion {
                    version: step.version(),
                });
            }
        }
        steps.sort_by_key(|s| s.version());
        Ok(Self { steps })
    }

    #[must_use]
    pub fn versions(&self) -> Vec<i64> {
        self.steps.iter().map(|s| s.version()).collect()
    }

    /// Versions with no ledger row yet.
    ///
    /// # Errors
    /// Returns [`MigrationError::Ledger`] if the ledger cannot be read.
    pub async fn pending_versions(&self, ctx: &MigrationContext) -> Result<Vec<i64>, MigrationError> {
        ensure_ledger(ctx.conn())
            .await
            .map_err(|source| MigrationError::Ledger { source })?;
        let applied = applied_versions(ctx.conn())
            .await
            .map_err(|source| MigrationError::Ledger { source })?;
        Ok(self
            .versions()
            .into_iter()
            .filter(|v| !applied.contains(v))
            .collect())
    }

    /// Walk every step once.
    ///
    /// # Errors
    /// Returns the first fatal step failure, or a ledger error.
    pub async fn run(&self, ctx: &MigrationContext) -> Result<MigrationReport, MigrationError> {
        ensure_ledger(ctx.conn())
            .await
            .map_err(|source| MigrationError::Ledger { source })?;

        info!(steps = self.steps.len(), "Running schema migrations");
        let mut report = MigrationReport::default();

        for step in &self.steps {
            let version = step.version();
            let description = step.description();
            ctx.observer().step_started(version, description);
            let started = Instant::now();

            let outcome = match run_step(step.as_ref(), ctx).await {
                Ok(outcome) => outcome,
                Err(source) => match step.policy() {
                    FailurePolicy::Fatal => {
                        error!(version, description, error = %source, "Structural migration failed");
                        return Err(MigrationError::StructuralMigrationFailure {
                            version,
                            description: description.to_owned(),
                            source,
                        });
                    }
                    FailurePolicy::BestEffort => StepOutcome::Degraded {
                        error: source.to_string(),
                    },
                },
            };

            ctx.observer()
                .step_finished(version, description, &outcome, started.elapsed());
            report.steps.push(StepReport {
                version,
                description: description.to_owned(),
                outcome,
            });
        }

        info!(
            applied = report.applied().len(),
            deferred = report.deferred().len(),
            degraded = report.degraded().len(),
            "Schema migrations finished"
        );
        Ok(report)
    }
}

async fn run_step(step: &dyn MigrationStep, ctx: &MigrationContext) -> Result<StepOutcome, StepError> {
    let version = step.version();

    if step.verify(ctx).await? {
        debug!(version, "End state already present, refreshing ledger");
        record_version(ctx.conn(), version, step.description(), ctx.clock().now()).await?;
        return Ok(StepOutcome::AlreadyApplied);
    }

    match step.apply(ctx).await? {
        ApplyOutcome::Completed => {
            if !step.verify(ctx).await? {
                return Err(StepError::Verification(format!(
                    "version {version} applied but its end state is not present"
                )));
            }
            record_version(ctx.conn(), version, step.description(), ctx.clock().now()).await?;
            Ok(StepOutcome::Applied)
        }
        ApplyOutcome::Deferred { reason } => {
            warn!(version, reason = %reason, "Migration step deferred to a later run");
            Ok(StepOutcome::Deferred { reason })
        }
    }
}

/// # Errors
/// Returns the driver error unchanged.
pub async fn ensure_ledger<C: ConnectionTrait>(conn: &C) -> Result<(), DbErr> {
    conn.execute(statement(format!(
        r"
        CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL,
            description TEXT
        )
        "
    )))
    .await?;
    Ok(())
}

/// # Errors
/// Returns the driver error unchanged.
pub async fn record_version<C: ConnectionTrait>(
    conn: &C,
    version: i64,
    description: &str,
    applied_at: OffsetDateTime,
) -> Result<(), DbErr> {
    let applied_at = applied_at
        .format(&Rfc3339)
        .map_err(|e| DbErr::Custom(format!("cannot format applied_at: {e}")))?;
    conn.execute(statement_with(
        format!(
            "INSERT OR REPLACE INTO {LEDGER_TABLE} (version, applied_at, description) VALUES (?, ?, ?)"
        ),
        [version.into(), applied_at.into(), description.into()],
    ))
    .await?;
    Ok(())
}

/// # Errors
/// Returns the driver error unchanged.
pub async fn applied_versions<C: ConnectionTrait>(conn: &C) -> Result<BTreeSet<i64>, DbErr> {
    Ok(ledger_records(conn)
        .await?
        .into_iter()
        .map(|r| r.version)
        .collect())
}

/// All ledger rows in version order.
///
/// # Errors
/// Returns the driver error, or [`DbErr::Type`] when a timestamp does not parse.
pub async fn ledger_records<C: ConnectionTrait>(conn: &C) -> Result<Vec<SchemaVersionRecord>, DbErr> {
    let rows = LedgerRow::find_by_statement(statement(format!(
        "SELECT version, applied_at, description FROM {LEDGER_TABLE} ORDER BY version"
    )))
    .all(conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            let applied_at = OffsetDateTime::parse(&row.applied_at, &Rfc3339).map_err(|e| {
                DbErr::Type(format!("bad applied_at for version {}: {e}", row.version))
            })?;
            Ok(SchemaVersionRecord {
                version: row.version,
                applied_at,
                description: row.description,
            })
        })
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::Db;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    struct FlagStep {
        version: i64,
        policy: FailurePolicy,
        fail: bool,
        done: Mutex<bool>,
    }

    impl FlagStep {
        fn boxed(version: i64, policy: FailurePolicy, fail: bool) -> Box<dyn MigrationStep> {
            Box::new(Self {
                version,
                policy,
                fail,
                done: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl MigrationStep for FlagStep {
        fn version(&self) -> i64 {
            self.version
        }

        fn description(&self) -> &str {
            "flag step"
        }

        fn policy(&self) -> FailurePolicy {
            self.policy
        }

        async fn verify(&self, _ctx: &MigrationContext) -> Result<bool, StepError> {
            Ok(*self.done.lock())
        }

        async fn apply(&self, _ctx: &MigrationContext) -> Result<ApplyOutcome, StepError> {
            if self.fail {
                return Err(StepError::Invalid("boom".to_owned()));
            }
            *self.done.lock() = true;
            Ok(ApplyOutcome::Completed)
        }
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let err = MigrationRunner::new(vec![
            FlagStep::boxed(1, FailurePolicy::Fatal, false),
            FlagStep::boxed(1, FailurePolicy::Fatal, false),
        ])
        .unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { version: 1 }));
    }

    #[test]
    fn steps_are_sorted() {
        let runner = MigrationRunner::new(vec![
            FlagStep::boxed(3, FailurePolicy::Fatal, false),
            FlagStep::boxed(1, FailurePolicy::Fatal, false),
            FlagStep::boxed(2, FailurePolicy::Fatal, false),
        ])
        .unwrap();
        assert_eq!(runner.versions(), vec![1, 2, 3]);
    }

    #[tokio::test]
    #[traced_test]
    async fn best_effort_failure_degrades_and_continues() {
        let db = Db::in_memory().await.unwrap();
        let ctx = MigrationContext::new(db.conn().clone());
        let runner = MigrationRunner::new(vec![
            FlagStep::boxed(1, FailurePolicy::Fatal, false),
            FlagStep::boxed(2, FailurePolicy::BestEffort, true),
            FlagStep::boxed(3, FailurePolicy::Fatal, false),
        ])
        .unwrap();

        let report = runner.run(&ctx).await.unwrap();
        assert_eq!(report.applied(), vec![1, 3]);
        assert_eq!(report.degraded(), vec![2]);
        assert!(logs_contain("continuing in degraded mode"));

        let applied = applied_versions(ctx.conn()).await.unwrap();
        assert_eq!(applied.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[tokio::test]
    async fn fatal_failure_stops_the_run() {
        let db = Db::in_memory().await.unwrap();
        let ctx = MigrationContext::new(db.conn().clone());
        let runner = MigrationRunner::new(vec![
            FlagStep::boxed(1, FailurePolicy::Fatal, true),
            FlagStep::boxed(2, FailurePolicy::Fatal, false),
        ])
        .unwrap();

        let err = runner.run(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::StructuralMigrationFailure { version: 1, .. }
        ));
        assert_eq!(runner.pending_versions(&ctx).await.unwrap(), vec![1, 2]);
    }
}
