//! Error kinds returned by the core. Fatal on-disk corruption is never
//! represented here: it panics, per spec (see `cache` and `inode`).

use thiserror::Error;

/// Non-fatal failure of a core operation. Every public entry point that can
/// fail for reasons a caller should handle returns `Result<T, FsError>`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("file or directory already exists")]
    AlreadyExists,

    #[error("name too long")]
    NameTooLong,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("directory not empty")]
    DirectoryNotEmpty,

    #[error("no space left on device")]
    NoSpace,

    #[error("write denied")]
    WriteDenied,

    #[error("bad path")]
    BadPath,
}

pub type FsResult<T> = Result<T, FsError>;
