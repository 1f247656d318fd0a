#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{T0, TestCipher, test_config};
use notes_vault::{NewNote, NotesVault, VaultPorts};
use vault_db::{DbConfig, ManualClock, StepOutcome};
use vault_security::{SessionIdentity, UserId};

fn ports() -> VaultPorts {
    let identity = Arc::new(SessionIdentity::signed_in(UserId::new("alice")));
    VaultPorts::new(identity, Arc::new(TestCipher)).with_clock(Arc::new(ManualClock::at_millis(T0)))
}

#[tokio::test]
async fn reopening_a_file_store_keeps_notes_and_skips_applied_steps() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.database = DbConfig {
        dsn: format!("sqlite://{}", dir.path().join("device").join("vault.db").display()),
        ..DbConfig::default()
    };

    let vault = NotesVault::open(config.clone(), ports()).await.unwrap();
    assert_eq!(vault.migration_report().applied(), (1..=10).collect::<Vec<_>>());
    let id = vault
        .notes()
        .create(NewNote {
            title: "persisted".to_owned(),
            body: "across restarts".to_owned(),
            is_pinned: false,
        })
        .await
        .unwrap()
        .id;
    vault.close().await.unwrap();

    let vault = NotesVault::open(config, ports()).await.unwrap();
    assert!(
        vault
            .migration_report()
            .steps
            .iter()
            .all(|s| s.outcome == StepOutcome::AlreadyApplied)
    );
    let note = vault.notes().get(&id).await.unwrap();
    assert_eq!(note.title, "persisted");
    assert_eq!(note.body, "across restarts");
    vault.close().await.unwrap();
}
