use sea_orm::DbErr;
use thiserror::Error;
use vault_security::AuthError;

use super::cipher::CipherError;
use super::folders::FolderError;

/// Errors surfaced by the vault repositories.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Folder(#[from] FolderError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("Validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl RepoError {
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The authorization error, if this is one.
    #[must_use]
    pub fn as_auth(&self) -> Option<&AuthError> {
        match self {
            Self::Auth(e) => Some(e),
            _ => None,
        }
    }
}
