#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{T0, TestCipher, db_at_version, exec_with, scalar};
use notes_vault::infra::storage::cutover::CutoverError;
use notes_vault::{ColumnCipher, CutoverOutcome, CutoverState, EncryptionCutoverTracker, EncryptionVersion, Family};

#[tokio::test]
async fn families_are_unmigrated_before_the_sealed_columns_exist() {
    let (db, _clock) = db_at_version(4).await;
    let tracker = EncryptionCutoverTracker::new(db.conn());
    for family in Family::ALL {
        assert_eq!(tracker.state(family).await.unwrap(), CutoverState::Unmigrated);
    }
    assert!(matches!(
        tracker.cutover().await,
        Err(CutoverError::Unmigrated { family: Family::Notes })
    ));
    assert!(matches!(
        tracker.unsealed_ids(Family::Tasks, 5).await,
        Err(CutoverError::Unmigrated { family: Family::Tasks })
    ));
}

#[tokio::test]
async fn sealed_rows_never_go_back_to_plaintext() {
    let (db, _clock) = db_at_version(8).await;
    exec_with(
        db.conn(),
        "INSERT INTO templates (id, title, body, owner_user_id, created_at) VALUES ('tpl', 'Weekly', 'agenda', 'alice', ?)",
        vec![T0.into()],
    )
    .await;
    let tracker = EncryptionCutoverTracker::new(db.conn());
    assert_eq!(tracker.pending_rows(Family::Templates).await.unwrap(), 1);

    let err = tracker
        .seal_row(Family::Templates, "tpl", &[("content", vec![1])])
        .await
        .unwrap_err();
    assert!(matches!(err, CutoverError::UnknownField { .. }));
    let err = tracker
        .seal_row(Family::Templates, "missing", &[("title", vec![1])])
        .await
        .unwrap_err();
    assert!(matches!(err, CutoverError::RowNotFound { .. }));

    tracker
        .seal_row(
            Family::Templates,
            "tpl",
            &[
                ("title", TestCipher.seal("Weekly").unwrap()),
                ("body", TestCipher.seal("agenda").unwrap()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(tracker.pending_rows(Family::Templates).await.unwrap(), 0);
    assert_eq!(tracker.state(Family::Templates).await.unwrap(), CutoverState::Verified);

    let err = tracker
        .set_version(Family::Templates, "tpl", EncryptionVersion::Plaintext)
        .await
        .unwrap_err();
    assert!(matches!(err, CutoverError::Regression { .. }));
    tracker
        .set_version(Family::Templates, "tpl", EncryptionVersion::Sealed)
        .await
        .unwrap();
}

#[tokio::test]
async fn cutover_is_all_or_nothing_across_families() {
    let (db, _clock) = db_at_version(8).await;
    exec_with(
        db.conn(),
        "INSERT INTO note_reminders (id, note_id, title, owner_user_id, created_at) VALUES ('r1', 'n1', 'call', 'alice', ?)",
        vec![T0.into()],
    )
    .await;
    let tracker = EncryptionCutoverTracker::new(db.conn());

    match tracker.cutover().await.unwrap() {
        CutoverOutcome::Aborted { pending } => {
            assert_eq!(pending.len(), 1);
            assert_eq!(pending.get(&Family::Reminders), Some(&1));
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(tracker.state(Family::Notes).await.unwrap(), CutoverState::Verified);

    assert_eq!(tracker.seal_pending(&TestCipher, Family::Reminders, 10).await.unwrap(), 1);
    match tracker.cutover().await.unwrap() {
        CutoverOutcome::Completed { families, reports } => {
            assert_eq!(families, Family::ALL.to_vec());
            assert_eq!(reports.len(), 4);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    for family in Family::ALL {
        assert_eq!(tracker.state(family).await.unwrap(), CutoverState::PlaintextDropped);
    }
    assert_eq!(scalar(db.conn(), "SELECT COUNT(*) FROM note_reminders").await, 1);
    assert_eq!(tracker.seal_pending(&TestCipher, Family::Reminders, 10).await.unwrap(), 0);
}
