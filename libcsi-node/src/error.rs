//! Node-side error types.
//!
//! Every fallible routine in `libcsi-node` returns [`NodeError`].  The enum
//! derives [`thiserror::Error`] and, like the rest of the rk8s CSI stack,
//! [`Serialize`]/[`Deserialize`] so an outer request handler can forward it
//! verbatim.  Payloads are plain strings for that reason.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for mount lifecycle and parameter resolution.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The path or device does not exist.
    #[error("{path} not found")]
    NotFound {
        /// Missing path.
        path: String,
    },

    /// The mount point exists but its backing filesystem is unreachable.
    #[error("corrupted mount point {path}: {reason}")]
    CorruptMount {
        /// Mount point path.
        path: String,
        /// Evidence reported by the mount table check or the I/O probe.
        reason: String,
    },

    /// Nothing is mounted at the path.
    #[error("{path}: not mounted")]
    NotMounted {
        /// Path that was asked to be unmounted.
        path: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Mount point path.
        path: String,
        /// Underlying OS error text.
        reason: String,
    },

    /// A corrupted mount point was found and could not be unmounted.
    #[error(
        "failed to unmount corrupt mount point {path} umount error: {unmount} eval error: {evidence}"
    )]
    CorruptMountRecovery {
        /// Mount point path.
        path: String,
        /// Why the unmount failed.
        unmount: String,
        /// Why the mount point was judged corrupt in the first place.
        evidence: String,
    },

    /// A volume option could not be parsed or failed validation.
    #[error("invalid parameter {field}={value:?}: {reason}")]
    InvalidParameter {
        /// Option key.
        field: String,
        /// Raw option value.
        value: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The path exists but is not a directory.
    #[error("path {path} exists but is not a folder")]
    NotADirectory {
        /// Offending path.
        path: String,
    },

    /// Any other filesystem error.
    #[error("{path}: {reason}")]
    Io {
        /// Path the operation was applied to.
        path: String,
        /// OS error text.
        reason: String,
    },

    /// An external command exited unsuccessfully.
    #[error("command {command} failed (exit code {code:?}): {output}")]
    CommandFailed {
        /// Command line that was run.
        command: String,
        /// Exit code, `None` when killed by a signal or never started.
        code: Option<i32>,
        /// Combined output.
        output: String,
    },
}

impl NodeError {
    /// Map a [`std::io::Error`] raised while operating on `path`.
    ///
    /// `NotFound` is kept distinct because callers branch on it.
    pub fn io(path: &Path, e: std::io::Error) -> Self {
        let path = path.display().to_string();
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io {
                path,
                reason: e.to_string(),
            }
        }
    }

    /// Create a [`NodeError::InvalidParameter`].
    pub fn invalid<E: std::fmt::Display>(field: &str, value: &str, reason: E) -> Self {
        Self::InvalidParameter {
            field: field.to_owned(),
            value: value.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error means "there was nothing to unmount".
    ///
    /// Besides [`NodeError::NotMounted`], backends that shell out to
    /// `umount(8)` only give us text, so the usual messages are matched in
    /// the failure reason (never in the path).
    pub fn is_not_mounted(&self) -> bool {
        let text = match self {
            Self::NotMounted { .. } => return true,
            Self::UnmountFailed { reason, .. } => reason,
            Self::CommandFailed { output, .. } => output,
            _ => return false,
        };
        text.contains("not mounted") || text.contains("no mount point specified")
    }

    /// Whether this error reports a path that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error reports a corrupted mount.
    pub fn is_corrupt_mount(&self) -> bool {
        matches!(self, Self::CorruptMount { .. })
    }
}
