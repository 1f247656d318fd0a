#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{DAY, T0, open_vault, open_vault_with, scalar, test_config};
use notes_vault::config::AuthorizationConfig;
use notes_vault::infra::storage::repo::pending_ops;
use notes_vault::{EncryptionVersion, FolderError, NewNote, NewReminder, RepoError};
use vault_db::clock::duration_millis;
use vault_security::{AuthError, DenialDisclosure, Operation, UserId};

fn note(title: &str) -> NewNote {
    NewNote {
        title: title.to_owned(),
        body: format!("{title} body"),
        is_pinned: false,
    }
}

fn auth(err: &RepoError) -> &AuthError {
    err.as_auth().unwrap_or_else(|| panic!("expected an auth error, got {err:?}"))
}

#[tokio::test]
async fn notes_are_stored_sealed_and_read_back() {
    let tv = open_vault(Some("alice")).await;
    let repo = tv.vault.notes();

    let created = repo.create(note("groceries")).await.unwrap();
    assert_eq!(created.owner, UserId::new("alice"));
    assert_eq!(created.encryption, EncryptionVersion::Sealed);

    let fetched = repo.get(&created.id).await.unwrap();
    assert_eq!(fetched.title, "groceries");
    assert_eq!(fetched.body, "groceries body");

    let sealed_len = scalar(
        tv.conn(),
        &format!("SELECT length(title_encrypted) FROM notes WHERE id = '{}'", created.id),
    )
    .await;
    assert!(sealed_len > i64::try_from("groceries".len()).unwrap());

    let ops = pending_ops::list_for(tv.conn(), &UserId::new("alice")).await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind, "note_upsert");
    assert_eq!(ops[0].entity_id, created.id);
}

#[tokio::test]
async fn list_active_puts_pinned_first_and_hides_other_users() {
    let tv = open_vault(Some("alice")).await;
    let repo = tv.vault.notes();
    repo.create(note("plain")).await.unwrap();
    tv.clock.advance(DAY);
    repo.create(NewNote {
        is_pinned: true,
        ..note("pinned")
    })
    .await
    .unwrap();

    tv.sign_in("bob");
    repo.create(note("bob's")).await.unwrap();

    tv.sign_in("alice");
    let titles: Vec<String> = repo.list_active().await.unwrap().into_iter().map(|n| n.title).collect();
    assert_eq!(titles, vec!["pinned".to_owned(), "plain".to_owned()]);
}

#[tokio::test]
async fn foreign_notes_are_forbidden_by_default() {
    let tv = open_vault(Some("alice")).await;
    let repo = tv.vault.notes();
    let id = repo.create(note("private")).await.unwrap().id;
    let mut audit = tv.vault.audit_trail().subscribe();

    tv.sign_in("bob");
    let err = repo.get(&id).await.unwrap_err();
    assert_eq!(auth(&err), &AuthError::forbidden("note", id.clone(), Operation::Read));
    let err = repo.update(&id, note("hijacked")).await.unwrap_err();
    assert_eq!(auth(&err), &AuthError::forbidden("note", id.clone(), Operation::Update));

    let mut denials = Vec::new();
    while let Ok(event) = audit.try_recv() {
        if !event.granted {
            denials.push(event);
        }
    }
    assert_eq!(denials.len(), 2);
    assert_eq!(denials[0].reason, format!("forbidden:{id}"));
    assert_eq!(denials[0].actor, Some(UserId::new("bob")));

    tv.sign_in("alice");
    assert_eq!(repo.get(&id).await.unwrap().title, "private");
}

#[tokio::test]
async fn concealing_disclosure_reports_not_found() {
    let mut config = test_config();
    config.authorization = AuthorizationConfig {
        disclosure: DenialDisclosure::NotFound,
    };
    let tv = open_vault_with(config, Some("alice")).await;
    let repo = tv.vault.notes();
    let id = repo.create(note("private")).await.unwrap().id;

    tv.sign_in("bob");
    let err = repo.soft_delete(&id).await.unwrap_err();
    assert_eq!(auth(&err), &AuthError::not_found("note", id.clone()));
    let missing = repo.get("no-such-note").await.unwrap_err();
    assert_eq!(auth(&missing), &AuthError::not_found("note", "no-such-note"));
}

#[tokio::test]
async fn signed_out_callers_are_rejected() {
    let tv = open_vault(None).await;
    let err = tv.vault.notes().create(note("nope")).await.unwrap_err();
    assert_eq!(auth(&err), &AuthError::Unauthenticated);
    let err = tv.vault.folders().tree().await.unwrap_err();
    assert_eq!(auth(&err), &AuthError::Unauthenticated);
}

#[tokio::test]
async fn soft_delete_schedules_purge_and_restore_undoes_it() {
    let tv = open_vault(Some("alice")).await;
    let repo = tv.vault.notes();
    let id = repo.create(note("temp")).await.unwrap().id;

    assert!(repo.soft_delete(&id).await.unwrap());
    assert!(!repo.soft_delete(&id).await.unwrap());
    assert!(matches!(auth(&repo.get(&id).await.unwrap_err()), AuthError::NotFound { .. }));

    let trash = repo.list_trash().await.unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].deleted_at, Some(T0));
    assert_eq!(trash[0].scheduled_purge_at, Some(T0 + duration_millis(30 * DAY)));

    assert!(repo.restore(&id).await.unwrap());
    let restored = repo.get(&id).await.unwrap();
    assert!(!restored.deleted);
    assert_eq!(restored.scheduled_purge_at, None);

    let kinds: Vec<String> = pending_ops::list_for_entity(tv.conn(), &id)
        .await
        .unwrap()
        .into_iter()
        .map(|op| op.kind)
        .collect();
    assert_eq!(kinds, vec!["note_upsert", "note_delete", "note_upsert"]);
}

#[tokio::test]
async fn batch_delete_checks_every_note_before_changing_any() {
    let tv = open_vault(Some("alice")).await;
    let repo = tv.vault.notes();
    let a1 = repo.create(note("a1")).await.unwrap().id;
    let a2 = repo.create(note("a2")).await.unwrap().id;
    tv.sign_in("bob");
    let b1 = repo.create(note("b1")).await.unwrap().id;
    tv.sign_in("alice");

    let err = repo
        .soft_delete_many(&[a1.clone(), b1.clone(), a2.clone()])
        .await
        .unwrap_err();
    assert_eq!(auth(&err), &AuthError::forbidden("note", b1.clone(), Operation::Delete));
    assert_eq!(repo.list_active().await.unwrap().len(), 2);

    let err = repo
        .soft_delete_many(&[a1.clone(), "ghost".to_owned()])
        .await
        .unwrap_err();
    assert_eq!(auth(&err), &AuthError::not_found("note", "ghost"));

    assert_eq!(repo.soft_delete_many(&[a1, a2]).await.unwrap(), 2);
    assert!(repo.list_active().await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_delete_reports_a_foreign_note_ahead_of_a_missing_one() {
    let tv = open_vault(Some("bob")).await;
    let repo = tv.vault.notes();
    let bob_note = repo.create(note("bob's")).await.unwrap().id;
    tv.sign_in("alice");
    let mut audit = tv.vault.audit_trail().subscribe();

    let err = repo
        .soft_delete_many(&[bob_note.clone(), "missing".to_owned()])
        .await
        .unwrap_err();
    assert_eq!(auth(&err), &AuthError::forbidden("note", bob_note.clone(), Operation::Delete));

    let mut denials = Vec::new();
    while let Ok(event) = audit.try_recv() {
        if !event.granted {
            denials.push(event);
        }
    }
    assert_eq!(denials.len(), 1);
    assert_eq!(denials[0].reason, format!("forbidden:{bob_note}"));
    assert_eq!(denials[0].metadata.get("batch_index").map(String::as_str), Some("0"));

    tv.sign_in("bob");
    assert_eq!(repo.list_active().await.unwrap().len(), 1);
}

#[tokio::test]
async fn reminders_follow_their_note_owner() {
    let tv = open_vault(Some("alice")).await;
    let note_id = tv.vault.notes().create(note("trip")).await.unwrap().id;
    let reminders = tv.vault.reminders();

    let created = reminders
        .create(NewReminder {
            note_id: note_id.clone(),
            title: "pack".to_owned(),
            body: "passport".to_owned(),
            remind_at: Some(T0 + 1_000),
        })
        .await
        .unwrap();
    assert_eq!(created.id.len(), 36);
    assert_eq!(reminders.get(&created.id).await.unwrap().body, "passport");
    assert_eq!(reminders.list_for_note(&note_id).await.unwrap().len(), 1);

    tv.sign_in("bob");
    let err = reminders
        .create(NewReminder {
            note_id: note_id.clone(),
            title: "sneaky".to_owned(),
            body: String::new(),
            remind_at: None,
        })
        .await
        .unwrap_err();
    assert_eq!(auth(&err), &AuthError::forbidden("note", note_id.clone(), Operation::Update));
    let err = reminders.soft_delete(&created.id).await.unwrap_err();
    assert_eq!(
        auth(&err),
        &AuthError::forbidden("reminder", created.id.clone(), Operation::Delete)
    );

    tv.sign_in("alice");
    assert!(reminders.soft_delete(&created.id).await.unwrap());
    assert!(reminders.list_for_note(&note_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reminder_validation_and_missing_note() {
    let tv = open_vault(Some("alice")).await;
    let reminders = tv.vault.reminders();
    let err = reminders
        .create(NewReminder {
            note_id: "ghost".to_owned(),
            title: "x".to_owned(),
            body: String::new(),
            remind_at: Some(-5),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "remind_at"));

    let err = reminders
        .create(NewReminder {
            note_id: "ghost".to_owned(),
            title: "x".to_owned(),
            body: String::new(),
            remind_at: None,
        })
        .await
        .unwrap_err();
    assert_eq!(auth(&err), &AuthError::not_found("note", "ghost"));
}

#[tokio::test]
async fn folder_moves_never_create_cycles() {
    let tv = open_vault(Some("alice")).await;
    let folders = tv.vault.folders();
    let work = folders.create("Work", None).await.unwrap();
    let projects = folders.create("Projects", Some(&work.id)).await.unwrap();
    let archive = folders.create("Archive", Some(&projects.id)).await.unwrap();
    let second = folders.create("Clients", Some(&work.id)).await.unwrap();
    assert_eq!(projects.sort_order, 0);
    assert_eq!(second.sort_order, 1);

    let err = folders.move_folder(&work.id, Some(&archive.id)).await.unwrap_err();
    assert!(matches!(err, RepoError::Folder(FolderError::Cycle { .. })));
    let err = folders.move_folder(&work.id, Some(&work.id)).await.unwrap_err();
    assert!(matches!(err, RepoError::Folder(FolderError::Cycle { .. })));

    folders.move_folder(&archive.id, None).await.unwrap();
    let tree = folders.tree().await.unwrap();
    let roots: Vec<&str> = tree.iter().map(|n| n.folder.name.as_str()).collect();
    assert_eq!(roots.len(), 2);
    assert!(roots.contains(&"Work") && roots.contains(&"Archive"));
    let work_node = tree.iter().find(|n| n.folder.id == work.id).unwrap();
    assert_eq!(work_node.children.len(), 2);
    assert_eq!(work_node.children[0].folder.name, "Projects");

    let err = folders.create("   ", None).await.unwrap_err();
    assert!(matches!(err, RepoError::Validation { ref field, .. } if field == "name"));
}

#[tokio::test]
async fn foreign_folders_cannot_be_moved_or_used_as_parents() {
    let tv = open_vault(Some("alice")).await;
    let folders = tv.vault.folders();
    let mine = folders.create("Mine", None).await.unwrap();

    tv.sign_in("bob");
    let theirs = folders.create("Theirs", None).await.unwrap();
    let err = folders.move_folder(&mine.id, None).await.unwrap_err();
    assert_eq!(auth(&err), &AuthError::forbidden("folder", mine.id.clone(), Operation::Move));
    let err = folders.move_folder(&theirs.id, Some(&mine.id)).await.unwrap_err();
    assert_eq!(auth(&err), &AuthError::forbidden("folder", mine.id.clone(), Operation::Update));
    assert_eq!(folders.tree().await.unwrap().len(), 1);
}

#[tokio::test]
async fn trashed_folder_children_surface_at_the_top() {
    let tv = open_vault(Some("alice")).await;
    let folders = tv.vault.folders();
    let parent = folders.create("Parent", None).await.unwrap();
    folders.create("Child", Some(&parent.id)).await.unwrap();

    assert!(folders.soft_delete(&parent.id).await.unwrap());
    let tree = folders.tree().await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].folder.name, "Child");
}
