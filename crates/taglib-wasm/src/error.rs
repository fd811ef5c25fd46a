//! Metadata error types.
//!
//! [`TaglibError`] separates domain outcomes reported by the guest (not an
//! audio file, save refused) from boundary failures, which are carried through
//! unchanged as [`SandboxError`].

use taglib_sandbox::SandboxError;

/// Unified error type for metadata operations.
#[derive(Debug, thiserror::Error)]
pub enum TaglibError {
    /// The path is not a file format the guest recognises.
    #[error("invalid file")]
    InvalidFile,

    /// The guest rejected the change or could not write the file.
    #[error("can't save file")]
    SaveFailed,

    /// A write was attempted through a read-only [`File`](crate::File).
    #[error("attempted write on read-only file")]
    Readonly,

    /// The [`File`](crate::File) handle was already released.
    #[error("file handle already closed")]
    Closed,

    /// Failure at the host/guest boundary.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl TaglibError {
    /// Whether the guest instance that produced this error must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Sandbox(e) if e.is_fatal())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TaglibError>;
