use std::collections::BTreeMap;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use thiserror::Error;
use tracing::{info, warn};
use vault_db::{
    Clock, Db, DbError, MigrationContext, MigrationError, MigrationObserver, MigrationReport,
    SystemClock, TracingObserver,
};
use vault_security::{BroadcastAuditTrail, IdentityProvider, OwnershipAuthorizer};

use crate::config::VaultConfig;
use crate::domain::ColumnCipher;
use crate::infra::storage::cutover::{CutoverError, EncryptionCutoverTracker, Family};
use crate::infra::storage::migrations;
use crate::infra::storage::repo::{FolderRepository, NoteRepository, ReminderRepository, RepoContext};
use crate::jobs::PurgeScheduler;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// What the host application plugs into the vault.
#[derive(Clone)]
pub struct VaultPorts {
    pub identity: Arc<dyn IdentityProvider>,
    pub cipher: Arc<dyn ColumnCipher>,
    pub clock: Arc<dyn Clock>,
    pub observer: Arc<dyn MigrationObserver>,
}

impl VaultPorts {
    /// System clock and tracing observer.
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityProvider>, cipher: Arc<dyn ColumnCipher>) -> Self {
        Self {
            identity,
            cipher,
            clock: Arc::new(SystemClock),
            observer: Arc::new(TracingObserver),
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
}

/// Migration context for `conn` as configured.
///
/// Legacy rows without an owner go to the configured bootstrap owner, or to
/// the signed-in user when none is configured.
#[must_use]
pub fn migration_context(conn: DatabaseConnection, config: &VaultConfig, ports: &VaultPorts) -> MigrationContext {
    let bootstrap_owner = config
        .migration
        .bootstrap_owner
        .clone()
        .or_else(|| ports.identity.current_user().map(|user| user.as_str().to_owned()));
    MigrationContext::new(conn)
        .with_clock(ports.clock.clone())
        .with_observer(ports.observer.clone())
        .with_bootstrap_owner(bootstrap_owner)
}

/// An opened, migrated vault.
pub struct NotesVault {
    db: Db,
    config: VaultConfig,
    ports: VaultPorts,
    audit: BroadcastAuditTrail,
    authz: OwnershipAuthorizer,
    report: MigrationReport,
}

impl std::fmt::Debug for NotesVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotesVault")
            .field("dsn", &self.db.dsn())
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl NotesVault {
    /// Connect to the configured database and bring its schema up to date.
    ///
    /// # Errors
    /// Connection errors and [`MigrationError::StructuralMigrationFailure`].
    pub async fn open(config: VaultConfig, ports: VaultPorts) -> Result<Self, VaultError> {
        let db = Db::connect(&config.database).await?;
        Self::with_db(db, config, ports).await
    }

    /// Like [`Self::open`] over an existing handle.
    ///
    /// # Errors
    /// Same as [`Self::open`].
    pub async fn with_db(db: Db, config: VaultConfig, ports: VaultPorts) -> Result<Self, VaultError> {
        info!(dsn = %db.dsn(), "Opening notes vault");
        let report = run_migrations(&db, &config, &ports).await?;

        let audit = BroadcastAuditTrail::new(config.audit.channel_capacity);
        let authz = OwnershipAuthorizer::new(ports.identity.clone(), Arc::new(audit.clone()));

        Ok(Self {
            db,
            config,
            ports,
            audit,
            authz,
            report,
        })
    }

    /// Run the migration steps again, e.g. to retry a deferred cutover.
    ///
    /// # Errors
    /// Same as [`Self::open`].
    pub async fn migrate(&mut self) -> Result<&MigrationReport, VaultError> {
        self.report = run_migrations(&self.db, &self.config, &self.ports).await?;
        Ok(&self.report)
    }

    /// Outcome of the most recent migration run.
    #[must_use]
    pub fn migration_report(&self) -> &MigrationReport {
        &self.report
    }

    #[must_use]
    pub fn conn(&self) -> &DatabaseConnection {
        self.db.conn()
    }

    #[must_use]
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    #[must_use]
    pub fn audit_trail(&self) -> &BroadcastAuditTrail {
        &self.audit
    }

    #[must_use]
    pub fn authorizer(&self) -> &OwnershipAuthorizer {
        &self.authz
    }

    #[must_use]
    pub fn notes(&self) -> NoteRepository {
        NoteRepository::new(self.repo_context())
    }

    #[must_use]
    pub fn reminders(&self) -> ReminderRepository {
        ReminderRepository::new(self.repo_context())
    }

    #[must_use]
    pub fn folders(&self) -> FolderRepository {
        FolderRepository::new(self.repo_context())
    }

    #[must_use]
    pub fn cutover(&self) -> EncryptionCutoverTracker<'_, DatabaseConnection> {
        EncryptionCutoverTracker::new(self.db.conn()).with_observer(self.ports.observer.as_ref())
    }

    /// Seal up to `batch` plaintext rows per family with the vault's cipher.
    ///
    /// # Errors
    /// The first cipher or driver error; earlier batches stay sealed.
    pub async fn seal_pending(&self, batch: u32) -> Result<BTreeMap<Family, u64>, CutoverError> {
        let tracker = self.cutover();
        let mut sealed = BTreeMap::new();
        for family in Family::ALL {
            let n = tracker.seal_pending(self.ports.cipher.as_ref(), family, batch).await?;
            if n > 0 {
                sealed.insert(family, n);
            }
        }
        Ok(sealed)
    }

    #[must_use]
    pub fn purge_scheduler(&self) -> PurgeScheduler {
        PurgeScheduler::new(
            self.db.conn().clone(),
            self.config.lifecycle(),
            self.ports.clock.clone(),
            self.config.retention.purge_interval,
        )
    }

    /// # Errors
    /// Returns the pool error on close.
    pub async fn close(self) -> Result<(), VaultError> {
        self.db.close().await?;
        Ok(())
    }

    fn repo_context(&self) -> RepoContext {
        RepoContext {
            conn: self.db.conn().clone(),
            authz: self.authz.clone(),
            cipher: self.ports.cipher.clone(),
            clock: self.ports.clock.clone(),
            lifecycle: self.config.lifecycle(),
            disclosure: self.config.authorization.disclosure,
        }
    }
}

async fn run_migrations(db: &Db, config: &VaultConfig, ports: &VaultPorts) -> Result<MigrationReport, VaultError> {
    let ctx = migration_context(db.conn().clone(), config, ports);
    let report = migrations::runner(config.step_settings())?.run(&ctx).await?;
    let deferred = report.deferred();
    if !deferred.is_empty() {
        warn!(?deferred, "Some migration steps are waiting on their preconditions");
    }
    Ok(report)
}
