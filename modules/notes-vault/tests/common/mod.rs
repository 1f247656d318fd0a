#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use notes_vault::config::VaultConfig;
use notes_vault::infra::storage::migrations::{self, StepSettings};
use notes_vault::infra::storage::soft_delete::DEFAULT_RETENTION;
use notes_vault::{CipherError, ColumnCipher, NotesVault, VaultPorts};
use sea_orm::{ConnectionTrait, DatabaseConnection, Value};
use vault_db::sql::{scalar_i64, statement, statement_with};
use vault_db::{Db, DbConfig, ManualClock, MigrationContext, MigrationReport};
use vault_security::{SessionIdentity, UserId};

pub const T0: i64 = 1_700_000_000_000;
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

const SEAL_PREFIX: &[u8] = b"sealed:";

/// Reversible stand-in for the real cipher: a prefix plus the bytes XOR-ed.
pub struct TestCipher;

impl ColumnCipher for TestCipher {
    fn seal(&self, plaintext: &str) -> Result<Vec<u8>, CipherError> {
        let mut out = SEAL_PREFIX.to_vec();
        out.extend(plaintext.bytes().map(|b| b ^ 0x5a));
        Ok(out)
    }

    fn open(&self, sealed: &[u8]) -> Result<String, CipherError> {
        let body = sealed
            .strip_prefix(SEAL_PREFIX)
            .ok_or_else(|| CipherError::Open("missing prefix".to_owned()))?;
        String::from_utf8(body.iter().map(|b| b ^ 0x5a).collect()).map_err(|e| CipherError::Open(e.to_string()))
    }
}

pub fn settings() -> StepSettings {
    StepSettings {
        retention: DEFAULT_RETENTION,
    }
}

pub async fn exec(conn: &DatabaseConnection, sql: &str) {
    conn.execute(statement(sql)).await.expect(sql);
}

pub async fn exec_with(conn: &DatabaseConnection, sql: &str, values: Vec<Value>) {
    conn.execute(statement_with(sql, values)).await.expect(sql);
}

pub async fn scalar(conn: &DatabaseConnection, sql: &str) -> i64 {
    scalar_i64(conn, statement(sql)).await.expect(sql)
}

pub fn context(db: &Db, clock: &Arc<ManualClock>, bootstrap_owner: Option<&str>) -> MigrationContext {
    MigrationContext::new(db.conn().clone())
        .with_clock(clock.clone())
        .with_bootstrap_owner(bootstrap_owner.map(str::to_owned))
}

/// A store brought up to and including `version`.
pub async fn db_at_version(version: i64) -> (Db, Arc<ManualClock>) {
    let db = Db::in_memory().await.expect("connect");
    let clock = Arc::new(ManualClock::at_millis(T0));
    migrations::runner_through(settings(), version)
        .unwrap()
        .run(&context(&db, &clock, None))
        .await
        .expect("partial migration");
    (db, clock)
}

pub async fn run_all(db: &Db, clock: &Arc<ManualClock>, bootstrap_owner: Option<&str>) -> MigrationReport {
    migrations::runner(settings())
        .unwrap()
        .run(&context(db, clock, bootstrap_owner))
        .await
        .expect("migration")
}

pub struct TestVault {
    pub vault: NotesVault,
    pub identity: Arc<SessionIdentity>,
    pub clock: Arc<ManualClock>,
}

impl TestVault {
    pub fn sign_in(&self, user: &str) {
        self.identity.sign_in(UserId::new(user));
    }

    pub fn conn(&self) -> &DatabaseConnection {
        self.vault.conn()
    }
}

pub fn test_config() -> VaultConfig {
    VaultConfig {
        database: DbConfig::in_memory(),
        ..VaultConfig::default()
    }
}

/// A vault over `db`, migrated to the latest version, with `user` signed in.
pub async fn vault_over(db: Db, clock: Arc<ManualClock>, config: VaultConfig, user: Option<&str>) -> TestVault {
    let identity = Arc::new(SessionIdentity::new());
    if let Some(u) = user {
        identity.sign_in(UserId::new(u));
    }
    let ports = VaultPorts::new(identity.clone(), Arc::new(TestCipher)).with_clock(clock.clone());
    let vault = NotesVault::with_db(db, config, ports).await.expect("open vault");
    TestVault { vault, identity, clock }
}

pub async fn open_vault(user: Option<&str>) -> TestVault {
    open_vault_with(test_config(), user).await
}

pub async fn open_vault_with(config: VaultConfig, user: Option<&str>) -> TestVault {
    let db = Db::in_memory().await.expect("connect");
    vault_over(db, Arc::new(ManualClock::at_millis(T0)), config, user).await
}
