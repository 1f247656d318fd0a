#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! On-device note/task vault.
//!
//! Owns the ordered schema steps of the local store, the one-way encryption
//! cutover, the soft delete lifecycle with its purge job, and repositories
//! that refuse to touch rows the signed-in user does not own.
//!
//! Open a vault with [`NotesVault::open`]; it migrates before returning.

pub mod config;
pub mod domain;
pub mod infra;
pub mod jobs;
pub mod module;

pub use config::{ConfigError, VaultConfig};
pub use domain::{
    CipherError, ColumnCipher, EncryptionVersion, Folder, FolderArena, FolderError, FolderNode,
    NewNote, NewReminder, Note, Reminder, RepoError,
};
pub use infra::storage::cutover::{CutoverOutcome, CutoverState, EncryptionCutoverTracker, Family};
pub use infra::storage::repo::{FolderRepository, NoteRepository, ReminderRepository};
pub use infra::storage::soft_delete::{PurgeReport, SoftDeleteLifecycle};
pub use jobs::PurgeScheduler;
pub use module::{NotesVault, VaultError, VaultPorts};
