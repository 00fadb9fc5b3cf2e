//! Error types surfaced by the filesystem core.

use thiserror::Error;

/// Errors produced by the filesystem core.
///
/// Backend failures are carried verbatim in [`FsError::Backend`] and never
/// interpreted; everything else originates in the core itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    /// The input path was not absolute.
    #[error("path must be absolute: {0}")]
    AbsolutePathRequired(String),

    /// The input path contained an unresolvable `..` segment.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A parent of the requested root is already watched.
    #[error("a parent of {0} is already watched")]
    ParentAlreadyWatched(String),

    /// A child of the requested root is already watched.
    #[error("a child of {0} is already watched")]
    ChildAlreadyWatched(String),

    /// The entry passed to unwatch is not a watched root.
    #[error("{0} is not watched")]
    NotWatched(String),

    /// The facade has not been initialized, or the core was dropped while
    /// an entry handle was still in use.
    #[error("filesystem not initialized")]
    NotInitialized,

    /// Opaque backend error, passed through without interpretation.
    #[error("{0}")]
    Backend(String),
}

impl FsError {
    /// Wrap a backend error message.
    pub fn backend(message: impl Into<String>) -> Self {
        FsError::Backend(message.into())
    }
}
