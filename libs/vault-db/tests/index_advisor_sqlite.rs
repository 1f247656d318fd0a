#![allow(clippy::unwrap_used, clippy::expect_used)]

use sea_orm::ConnectionTrait;
use vault_db::observer::ObservedEvent;
use vault_db::sql::statement;
use vault_db::{Db, DbConfig, IndexAdvisor, IndexOutcome, IndexSpec, RecordingObserver, SchemaIntrospector};

#[tokio::test]
async fn index_waits_for_its_columns() {
    let db = Db::in_memory().await.unwrap();
    let conn = db.conn();
    conn.execute(statement("CREATE TABLE notes (id TEXT PRIMARY KEY, deleted BOOLEAN)"))
        .await
        .unwrap();

    let observer = RecordingObserver::new();
    let advisor = IndexAdvisor::new(&observer);
    let spec = IndexSpec::on("notes", "idx_notes_purge", &["deleted", "scheduled_purge_at"]);

    let outcome = advisor.ensure_index(conn, &spec).await.unwrap();
    assert_eq!(
        outcome,
        IndexOutcome::Skipped {
            missing: vec!["scheduled_purge_at".to_owned()]
        }
    );
    assert!(IndexAdvisor::is_satisfied(conn, &spec).await.unwrap());

    conn.execute(statement("ALTER TABLE notes ADD COLUMN scheduled_purge_at INTEGER"))
        .await
        .unwrap();
    assert!(!IndexAdvisor::is_satisfied(conn, &spec).await.unwrap());

    assert!(matches!(
        advisor.ensure_index(conn, &spec).await.unwrap(),
        IndexOutcome::Created { .. }
    ));
    assert_eq!(
        advisor.ensure_index(conn, &spec).await.unwrap(),
        IndexOutcome::AlreadyPresent
    );
    assert_eq!(
        SchemaIntrospector::new(conn)
            .index_columns("idx_notes_purge")
            .await
            .unwrap(),
        vec!["deleted".to_owned(), "scheduled_purge_at".to_owned()]
    );

    let events = observer.events();
    assert!(matches!(&events[0], ObservedEvent::IndexSkipped { index, .. } if index == "idx_notes_purge"));
    assert!(matches!(&events[1], ObservedEvent::IndexCreated { index, .. } if index == "idx_notes_purge"));
}

#[tokio::test]
async fn partial_index_requires_predicate_columns() {
    let db = Db::in_memory().await.unwrap();
    let conn = db.conn();
    conn.execute(statement(
        "CREATE TABLE note_reminders (id INTEGER PRIMARY KEY, encryption_version INTEGER NOT NULL DEFAULT 0)",
    ))
    .await
    .unwrap();

    let observer = RecordingObserver::new();
    let spec = IndexSpec::on("note_reminders", "idx_note_reminders_unsealed", &["id"])
        .filtered("encryption_version = 0 AND deleted = 0", &["encryption_version", "deleted"]);
    let outcome = IndexAdvisor::new(&observer)
        .ensure_index(conn, &spec)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IndexOutcome::Skipped {
            missing: vec!["deleted".to_owned()]
        }
    );
}

#[tokio::test]
async fn file_backed_database_is_created_with_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("vault.db");
    let cfg = DbConfig {
        dsn: format!("sqlite://{}", path.display()),
        ..DbConfig::default()
    };
    let db = Db::connect(&cfg).await.unwrap();
    db.conn()
        .execute(statement("CREATE TABLE t (id INTEGER)"))
        .await
        .unwrap();
    let mode = db
        .conn()
        .query_one(statement("PRAGMA journal_mode"))
        .await
        .unwrap()
        .unwrap()
        .try_get_by_index::<String>(0)
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
    db.close().await.unwrap();
    assert!(path.exists());
}
