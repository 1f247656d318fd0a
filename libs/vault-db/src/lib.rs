#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Schema evolution toolkit for the embedded vault store.
//!
//! The crate wraps a `SeaORM` connection over `SQLite` and provides the pieces a
//! module needs to evolve its schema safely on-device:
//! - [`introspect::SchemaIntrospector`] answers "does this table/column/index exist"
//! - [`rebuild::TableRebuilder`] performs shadow-table rebuilds in one transaction
//! - [`index_advisor::IndexAdvisor`] creates indexes only when their columns exist
//! - [`migration_runner::MigrationRunner`] walks an ordered list of versioned steps
//!   and keeps the `schema_versions` ledger
//!
//! # Example
//! ```rust,no_run
//! use vault_db::{Db, DbConfig};
//!
//! # async fn demo() -> vault_db::Result<()> {
//! let db = Db::connect(&DbConfig::in_memory()).await?;
//! let conn = db.conn();
//! # let _ = conn;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod index_advisor;
pub mod introspect;
pub mod migration_runner;
pub mod observer;
pub mod rebuild;
pub mod sql;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DbConfig, JournalMode};
pub use index_advisor::{IndexAdvisor, IndexOutcome, IndexSpec};
pub use introspect::{ColumnInfo, SchemaIntrospector, TableSnapshot};
pub use migration_runner::{
    ApplyOutcome, FailurePolicy, MigrationContext, MigrationError, MigrationReport,
    MigrationRunner, MigrationStep, SchemaVersionRecord, StepError, StepOutcome, StepReport,
};
pub use observer::{MigrationObserver, ObservedEvent, RecordingObserver, TracingObserver};
pub use rebuild::{
    ColumnSpec, KeyRemap, RebuildError, RebuildPlan, RebuildReport, TableRebuilder, TargetSchema,
};

pub use sea_orm::ConnectionTrait as DbConnTrait;

use std::str::FromStr;

use sea_orm::sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sea_orm::{DatabaseConnection, SqlxSqliteConnector};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::sqlite_file_path;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Typed error for the DB handle.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Sqlx(#[from] sea_orm::sqlx::Error),

    #[error(transparent)]
    Sea(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connected handle over a `SQLite` pool.
#[derive(Debug, Clone)]
pub struct Db {
    conn: DatabaseConnection,
    dsn: String,
}

impl Db {
    /// Open (creating if needed) the database described by `cfg`.
    ///
    /// In-memory databases are pinned to a single, never-recycled connection so
    /// every caller sees the same schema.
    ///
    /// # Errors
    /// Returns an error if the DSN is invalid or the pool cannot connect.
    pub async fn connect(cfg: &DbConfig) -> Result<Self> {
        if cfg.max_connections == 0 {
            return Err(DbError::InvalidConfig(
                "max_connections must be at least 1".to_owned(),
            ));
        }

        let is_memory = cfg.is_memory();
        if !is_memory
            && cfg.create_dirs
            && let Some(path) = sqlite_file_path(&cfg.dsn)
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let connect_opts = SqliteConnectOptions::from_str(&cfg.dsn)?.create_if_missing(true);

        let journal_mode = cfg.effective_journal_mode().as_sql();
        let busy_timeout_ms = i64::try_from(cfg.busy_timeout.as_millis()).unwrap_or(i64::MAX);

        let mut pool = SqlitePoolOptions::new();
        pool = if is_memory {
            pool.max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool.max_connections(cfg.max_connections)
        };

        pool = pool.after_connect(move |conn, _meta| {
            Box::pin(async move {
                let stmt = format!("PRAGMA journal_mode = {journal_mode}");
                sea_orm::sqlx::query(&stmt).execute(&mut *conn).await?;
                sea_orm::sqlx::query("PRAGMA synchronous = NORMAL")
                    .execute(&mut *conn)
                    .await?;
                if !is_memory {
                    // pragmas take no bound parameters
                    let stmt = format!("PRAGMA busy_timeout = {busy_timeout_ms}");
                    sea_orm::sqlx::query(&stmt).execute(&mut *conn).await?;
                }
                Ok(())
            })
        });

        let pool = pool.connect_with(connect_opts).await?;
        let conn = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool);

        info!(dsn = %cfg.dsn, journal_mode, "Connected to vault database");
        Ok(Self {
            conn,
            dsn: cfg.dsn.clone(),
        })
    }

    /// Shorthand for a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the pool cannot be created.
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&DbConfig::in_memory()).await
    }

    #[must_use]
    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    #[must_use]
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Graceful pool close.
    ///
    /// # Errors
    /// Returns an error if the underlying pool reports a failure while closing.
    pub async fn close(self) -> Result<()> {
        debug!(dsn = %self.dsn, "Closing vault database");
        self.conn.close().await?;
        Ok(())
    }
}
