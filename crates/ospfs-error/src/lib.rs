#![forbid(unsafe_code)]
//! Error types for OSPFS.
//!
//! Defines `FsError` and a `Result<T>` alias used throughout the workspace.
//! Includes errno mappings so VFS/FUSE host adapters can reply directly.

use ospfs_types::ParseError;
use thiserror::Error;

/// Unified error type for all OSPFS operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    /// Free bitmap or inode table exhausted.
    #[error("no space left on device")]
    NoSpace,

    /// Name or symlink target exceeds its limit.
    #[error("name too long")]
    NameTooLong,

    /// Duplicate name in a directory.
    #[error("file exists")]
    Exists,

    /// Lookup or unlink miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invariant breach observed in the image (missing indirect block,
    /// unexpected block-index sentinel, arithmetic overflow).
    #[error("corrupt image: {0}")]
    Corruption(String),

    /// Malformed image or argument.
    #[error("invalid format: {0}")]
    Format(String),

    /// User-buffer transfer failure, surfaced by host adapters.
    #[error("user buffer fault")]
    Fault,

    /// Host adapter failed to materialize a handle.
    #[error("out of memory")]
    NoMem,

    /// Operation refused, e.g. resizing a directory through truncation.
    #[error("operation not permitted")]
    PermissionDenied,

    #[error("not a directory")]
    NotDirectory,

    #[error("is a directory")]
    IsDirectory,
}

impl FsError {
    /// Convert this error into a POSIX errno suitable for host replies.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::NoSpace => libc::ENOSPC,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::Exists => libc::EEXIST,
            Self::NotFound(_) => libc::ENOENT,
            Self::Corruption(_) => libc::EIO,
            Self::Format(_) => libc::EINVAL,
            Self::Fault => libc::EFAULT,
            Self::NoMem => libc::ENOMEM,
            Self::PermissionDenied => libc::EPERM,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
        }
    }
}

impl From<ParseError> for FsError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::InvalidMagic { .. } => Self::Format(err.to_string()),
            _ => Self::Corruption(err.to_string()),
        }
    }
}

/// Result alias using `FsError`.
pub type Result<T> = std::result::Result<T, FsError>;
