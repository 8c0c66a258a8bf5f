//! Common error types for targpg.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ContainerMode;

/// Top-level error type for targpg operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The archive file does not exist and creating it was declined.
    #[error("No secure file to load: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    /// Wrong password, or the file is corrupt or not a targpg archive.
    #[error("Unable to decrypt archive: {0}")]
    Decryption(String),

    /// Encrypting the archive for saving failed.
    #[error("Unable to encrypt archive: {0}")]
    Encryption(String),

    /// Unique add found names already present in the archive.
    #[error("File(s) already exist in archive: {}", .0.join(", "))]
    DuplicateMember(Vec<String>),

    /// Names requested for removal are not in the archive.
    #[error("File(s) do not exist in archive: {}", .0.join(", "))]
    MissingMember(Vec<String>),

    /// A path cannot be expressed relative to its base directory.
    #[error("Path {} is outside of {}", .path.display(), .base.display())]
    PathEscape { path: PathBuf, base: PathBuf },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Extraction selection could not be resolved to archive members.
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// New password and its confirmation differ.
    #[error("Passwords do not match")]
    PasswordMismatch,

    /// Container accessed in the wrong mode.
    #[error("Archive container is not in {expected} mode")]
    WrongMode { expected: ContainerMode },

    /// The archive has already been closed.
    #[error("Archive is closed")]
    Closed,

    /// Gzip compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Tar encoding or decoding failed.
    #[error("Archive format error: {0}")]
    Archive(String),

    /// Low-level cryptographic primitive failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
