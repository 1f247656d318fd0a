use serde::{Deserialize, Serialize};
use vault_security::UserId;

/// Per-row encryption state. Only ever moves from `Plaintext` to `Sealed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionVersion {
    Plaintext,
    Sealed,
}

impl EncryptionVersion {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Plaintext => 0,
            Self::Sealed => 1,
        }
    }

    #[must_use]
    pub fn from_i64(raw: i64) -> Self {
        if raw >= 1 { Self::Sealed } else { Self::Plaintext }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub owner: UserId,
    pub title: String,
    pub body: String,
    pub is_pinned: bool,
    pub created_at: i64,
    pub updated_at: Option<i64>,
    pub encryption: EncryptionVersion,
    pub deleted: bool,
    pub deleted_at: Option<i64>,
    pub scheduled_purge_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewNote {
    pub title: String,
    pub body: String,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub note_id: String,
    pub owner: UserId,
    pub title: String,
    pub body: String,
    pub remind_at: Option<i64>,
    pub is_active: bool,
    pub deleted: bool,
    pub scheduled_purge_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReminder {
    pub note_id: String,
    pub title: String,
    pub body: String,
    pub remind_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub owner: UserId,
    pub name: String,
    pub parent_id: Option<String>,
    pub sort_order: i64,
}

/// A folder and everything below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderNode {
    pub folder: Folder,
    pub children: Vec<FolderNode>,
}
