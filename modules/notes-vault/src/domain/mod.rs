pub mod cipher;
pub mod error;
pub mod folders;
pub mod model;

pub use cipher::{CipherError, ColumnCipher};
pub use error::RepoError;
pub use folders::{FolderArena, FolderError};
pub use model::{EncryptionVersion, Folder, FolderNode, NewNote, NewReminder, Note, Reminder};
