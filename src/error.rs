//! The crate's error taxonomy
//!
//! Every fallible operation in this crate resolves to [`Error`]. Most
//! variants wrap an [`io::Error`] so that the underlying `errno` (or, on
//! Windows, `GetLastError`) is always reachable via [`Error::errno`].

use std::io;
use std::path::PathBuf;

/// The crate's error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A native call failed
    ///
    /// Raised from resource acquisition (opening an inotify instance,
    /// creating a directory handle, creating a completion port) and from
    /// reads that were not recovered locally (see the `EINTR` handling in
    /// the Linux and polling adapters).
    #[error("{path:?}: {source}")]
    Os {
        /// The path the operation concerned, if any
        path: PathBuf,
        /// The underlying OS error
        #[source]
        source: io::Error,
    },

    /// An argument was invalid
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not supported by the active backend
    ///
    /// For example, a file watch requested against the Windows backend, or
    /// a [`crate::Watch`] passed to a monitor other than the one that
    /// created it.
    #[error("not supported: {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// Builds an [`Error::Os`] for a failure that concerned `path`
    pub fn os(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Os {
            path: path.into(),
            source,
        }
    }

    /// Builds an [`Error::Os`] from the last OS error, for a failure that
    /// concerned `path`
    pub fn last_os_error(path: impl Into<PathBuf>) -> Self {
        Error::os(path, io::Error::last_os_error())
    }

    /// The `errno` (Unix) or `GetLastError` (Windows) code behind this
    /// error, if it wraps one
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// This crate's result type
pub type Result<T> = std::result::Result<T, Error>;
