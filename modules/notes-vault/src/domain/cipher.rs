//! Port to the at-rest encryption primitive.
//!
//! The vault never sees keys. Whatever implements [`ColumnCipher`] owns them
//! and decides the sealed format; the vault only stores the bytes.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("sealing failed: {0}")]
    Seal(String),

    #[error("opening sealed data failed: {0}")]
    Open(String),

    #[error("no key available for the current user")]
    Locked,
}

/// Seals and opens single column values.
pub trait ColumnCipher: Send + Sync {
    /// # Errors
    /// Returns [`CipherError`] when the value cannot be sealed.
    fn seal(&self, plaintext: &str) -> Result<Vec<u8>, CipherError>;

    /// # Errors
    /// Returns [`CipherError`] when the bytes do not open.
    fn open(&self, sealed: &[u8]) -> Result<String, CipherError>;
}

/// Open a stored blob. An empty blob stands for content that was never sealed
/// before its plaintext column was dropped.
///
/// # Errors
/// Propagates the cipher's error.
pub fn open_stored(cipher: &dyn ColumnCipher, sealed: Option<&[u8]>) -> Result<String, CipherError> {
    match sealed {
        None | Some([]) => Ok(String::new()),
        Some(bytes) => cipher.open(bytes),
    }
}
