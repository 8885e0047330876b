//! Error types for OnFile
//!
//! This module defines the common error taxonomy used by the metadata
//! store and the directory reclaimer. Operating-system failures keep
//! their original errno so callers can apply their own policy.

use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Common result type for OnFile operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for OnFile
#[derive(Debug, Error)]
pub enum Error {
    /// The filesystem or quota ran out of room while persisting metadata.
    /// Remapped from ENOSPC/EDQUOT at the metadata write boundary.
    #[error("no space left for metadata on {target}")]
    NoSpace {
        target: String,
        #[source]
        source: io::Error,
    },

    /// An operating-system call failed with an errno that is not handled
    /// locally. The original error code is preserved in `source`.
    #[error("{op} failed on {target}: {source}")]
    Os {
        op: &'static str,
        target: String,
        #[source]
        source: io::Error,
    },

    /// A serialized payload encodes callable or class references and was
    /// rejected before any of it could take effect.
    #[error("potentially unsafe serialized payload rejected")]
    UnsafePayload,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an OS error preserving the original error code
    pub fn os(op: &'static str, target: impl Into<String>, source: io::Error) -> Self {
        Self::Os {
            op,
            target: target.into(),
            source,
        }
    }

    /// The raw OS error code carried by this error, if any
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::NoSpace { source, .. } | Self::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// True when the underlying cause is a vanished path or attribute
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.errno().is_some_and(|code| {
            matches!(
                Errno::from_raw(code),
                Errno::ENOENT | Errno::ESTALE | Errno::ENODATA
            )
        })
    }
}

/// True when `err` carries the given errno
#[must_use]
pub fn is_errno(err: &io::Error, expected: Errno) -> bool {
    err.raw_os_error() == Some(expected as i32)
}

/// True when `err` reports a vanished path (ENOENT, or ESTALE on
/// network filesystems)
#[must_use]
pub fn is_path_gone(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error().map(Errno::from_raw),
        Some(Errno::ENOENT | Errno::ESTALE)
    )
}

/// True when `err` reports a missing extended attribute
#[must_use]
pub fn is_no_attr(err: &io::Error) -> bool {
    is_errno(err, no_attr_errno())
}

/// The errno the platform reports for a missing extended attribute
#[must_use]
pub const fn no_attr_errno() -> Errno {
    #[cfg(target_os = "linux")]
    {
        Errno::ENODATA
    }
    #[cfg(not(target_os = "linux"))]
    {
        Errno::ENOATTR
    }
}
