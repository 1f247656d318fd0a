//! Table and column names shared by migrations, repositories and jobs.

pub const NOTES: &str = "notes";
pub const NOTE_TASKS: &str = "note_tasks";
pub const FOLDERS: &str = "folders";
pub const NOTE_FOLDERS: &str = "note_folders";
pub const NOTE_TAGS: &str = "note_tags";
pub const NOTE_LINKS: &str = "note_links";
pub const NOTE_REMINDERS: &str = "note_reminders";
pub const TEMPLATES: &str = "templates";
pub const ATTACHMENTS: &str = "attachments";
pub const SAVED_SEARCHES: &str = "saved_searches";
pub const PENDING_OPS: &str = "pending_ops";

pub const OWNER_COLUMN: &str = "owner_user_id";
pub const ENCRYPTION_VERSION: &str = "encryption_version";
pub const DELETED: &str = "deleted";
pub const DELETED_AT: &str = "deleted_at";
pub const SCHEDULED_PURGE_AT: &str = "scheduled_purge_at";

/// Every table holding user-owned rows. Notes come first: other tables
/// inherit their owner from the note they hang off.
pub const OWNED_TABLES: [&str; 11] = [
    NOTES,
    NOTE_TASKS,
    FOLDERS,
    NOTE_FOLDERS,
    NOTE_TAGS,
    NOTE_LINKS,
    NOTE_REMINDERS,
    TEMPLATES,
    ATTACHMENTS,
    SAVED_SEARCHES,
    PENDING_OPS,
];

/// Tables with `deleted` / `deleted_at` / `scheduled_purge_at`.
pub const SOFT_DELETE_TABLES: [&str; 5] = [NOTES, NOTE_TASKS, FOLDERS, TEMPLATES, NOTE_REMINDERS];

/// Tables whose rows disappear with their note once it is purged.
pub const NOTE_CHILD_TABLES: [(&str, &str); 6] = [
    (NOTE_TASKS, "note_id"),
    (NOTE_REMINDERS, "note_id"),
    (NOTE_FOLDERS, "note_id"),
    (NOTE_TAGS, "note_id"),
    (NOTE_LINKS, "source_id"),
    (ATTACHMENTS, "note_id"),
];

pub const FTS_TABLE: &str = "fts_notes";
pub const FTS_TRIGGERS: [&str; 3] = ["trg_notes_fts_ai", "trg_notes_fts_au", "trg_notes_fts_ad"];

pub const OP_NOTE_UPSERT: &str = "note_upsert";
pub const OP_NOTE_DELETE: &str = "note_delete";
pub const OP_REMINDER_UPSERT: &str = "reminder_upsert";
pub const OP_REMINDER_DELETE: &str = "reminder_delete";
pub const OP_FOLDER_UPSERT: &str = "folder_upsert";

/// Queue kinds keyed by a reminder id.
pub const REMINDER_OP_KINDS: [&str; 2] = [OP_REMINDER_UPSERT, OP_REMINDER_DELETE];

/// The column of `table` that points at the owning note, for tables that have one.
#[must_use]
pub fn note_reference(table: &str) -> Option<&'static str> {
    match table {
        NOTE_TASKS | NOTE_FOLDERS | NOTE_TAGS | NOTE_REMINDERS | ATTACHMENTS => Some("note_id"),
        NOTE_LINKS => Some("source_id"),
        PENDING_OPS => Some("entity_id"),
        _ => None,
    }
}
