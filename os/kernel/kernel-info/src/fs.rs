//! # Filesystem Collaborator

use alloc::string::String;
use alloc::vec::Vec;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("no such file: {0}")]
    NotFound(String),
    #[error("i/o error at offset {0:#x}")]
    Io(u64),
}

/// Whole-file reads against the mounted root.
pub trait Filesystem: Send + Sync {
    /// Read the complete contents of `name`.
    ///
    /// # Errors
    /// Missing file or device failure.
    fn read_entire(&self, name: &str) -> Result<Vec<u8>, FsError>;
}
