//! Mount point lifecycle engine.
//!
//! [`MountManager`] decides whether a path is a usable mount point, recovers
//! corrupted mounts by unmounting them, and tears mount points down again.
//! The actual mount table and syscalls sit behind the [`Mounter`] trait so
//! the engine can run against [`linux::LinuxMounter`] in production and a
//! fake in tests.
//!
//! Nothing here is retried internally: every operation is idempotent and
//! safe to call again.  Everything blocks, and only the forced unmount is
//! bounded by a timeout.

pub mod linux;
pub mod probe;

use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::NODE_CONFIG;
use crate::error::NodeError;
use crate::types::MountPointState;

/// Permissions for a freshly created mount point.
const MOUNT_POINT_MODE: u32 = 0o750;

/// Permissions for [`ensure_directory`].
const DIRECTORY_MODE: u32 = 0o777;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Mount backend capability.
pub trait Mounter: Send + Sync {
    /// Whether `path` is currently a mount point.
    ///
    /// Returns [`NodeError::NotFound`] for a missing path and
    /// [`NodeError::CorruptMount`] when the mount exists but its backend is
    /// unreachable.
    fn is_mount_point(&self, path: &Path) -> Result<bool, NodeError>;

    /// Detach whatever is mounted at `path`.
    fn unmount(&self, path: &Path) -> Result<(), NodeError>;

    /// Whether [`Mounter::force_unmount`] does anything beyond a plain unmount.
    fn supports_force_unmount(&self) -> bool {
        false
    }

    /// Unmount, escalating to a forced unmount once `timeout` elapses.
    fn force_unmount(&self, path: &Path, _timeout: Duration) -> Result<(), NodeError> {
        self.unmount(path)
    }

    /// Unmount `path` if it is still mounted (or corrupt), verify it is no
    /// longer a mount point, then remove the directory tree.
    ///
    /// A missing path is already clean.
    fn cleanup_mount_point(&self, path: &Path) -> Result<(), NodeError> {
        let mounted = match self.is_mount_point(path) {
            Ok(mounted) => mounted,
            Err(e) if e.is_not_found() => {
                debug!(path = %path.display(), "mount point already removed");
                return Ok(());
            }
            Err(e) if e.is_corrupt_mount() => {
                warn!(path = %path.display(), error = %e, "cleaning up corrupt mount point");
                true
            }
            Err(e) => return Err(e),
        };

        if mounted {
            match self.unmount(path) {
                Ok(()) => {}
                Err(e) if e.is_not_mounted() => {}
                Err(e) => return Err(e),
            }
            match self.is_mount_point(path) {
                Ok(false) => {}
                Err(e) if e.is_not_found() => return Ok(()),
                Ok(true) => {
                    return Err(NodeError::UnmountFailed {
                        path: path.display().to_string(),
                        reason: "still mounted after unmount".to_owned(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        match std::fs::remove_dir_all(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(NodeError::io(path, e)),
        }
        info!(path = %path.display(), "mount point cleaned up");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unmount dispatch
// ---------------------------------------------------------------------------

/// How [`MountManager`] unmounts, chosen once from the backend's capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmounter {
    /// Plain `unmount`.
    Plain,
    /// Forced unmount bounded by the given timeout.
    Forced(Duration),
}

impl Unmounter {
    /// Pick the strongest strategy `mounter` supports.
    pub fn select<M: Mounter + ?Sized>(mounter: &M, timeout: Duration) -> Self {
        if mounter.supports_force_unmount() {
            Self::Forced(timeout)
        } else {
            Self::Plain
        }
    }

    /// Unmount `path`. Nothing mounted there counts as success.
    pub fn unmount<M: Mounter + ?Sized>(&self, mounter: &M, path: &Path) -> Result<(), NodeError> {
        let result = match *self {
            Self::Forced(timeout) => {
                info!(path = %path.display(), ?timeout, "trying to force unmount potential mount point");
                mounter.force_unmount(path, timeout)
            }
            Self::Plain => {
                info!(path = %path.display(), "trying to unmount potential mount point");
                mounter.unmount(path)
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_mounted() => {
                info!(path = %path.display(), "no need for unmount, not a mount point");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Mount point lifecycle engine over a [`Mounter`] backend.
///
/// Holds no mutable state; one instance can serve concurrent requests.
pub struct MountManager<M> {
    mounter: M,
    unmounter: Unmounter,
}

impl<M: Mounter> MountManager<M> {
    /// Create an engine using the forced-unmount timeout from [`NODE_CONFIG`].
    pub fn new(mounter: M) -> Self {
        Self::with_timeout(mounter, NODE_CONFIG.force_unmount_timeout)
    }

    /// Create an engine with an explicit forced-unmount timeout.
    pub fn with_timeout(mounter: M, force_unmount_timeout: Duration) -> Self {
        let unmounter = Unmounter::select(&mounter, force_unmount_timeout);
        Self { mounter, unmounter }
    }

    pub fn mounter(&self) -> &M {
        &self.mounter
    }

    pub fn unmounter(&self) -> Unmounter {
        self.unmounter
    }

    /// Work out the state of `path` from the mount table and the I/O probe.
    ///
    /// Has the side effect of the probe's sentinel file, which is always
    /// removed again.
    pub fn assess(&self, path: &Path) -> Result<MountPointState, NodeError> {
        classify(path, self.mounter.is_mount_point(path), || {
            info!(path = %path.display(), "probing mount point I/O to make sure it's healthy");
            probe::check_mount_point_io(path)
        })
    }

    /// Make sure `path` is either a healthy mount point or an empty slot
    /// ready for a fresh mount.
    ///
    /// Returns `true` only for a healthy existing mount.  A missing path is
    /// created; a corrupt mount is unmounted.  In both cases `false` tells
    /// the caller to mount.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn ensure_mount_point(&self, path: &Path) -> Result<bool, NodeError> {
        info!("trying to ensure mount point");
        match self.assess(path)? {
            MountPointState::Absent => {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(MOUNT_POINT_MODE)
                    .create(path)
                    .map_err(|e| NodeError::io(path, e))?;
                debug!("created mount point directory");
                Ok(false)
            }
            MountPointState::Unmounted => Ok(false),
            MountPointState::Healthy => Ok(true),
            MountPointState::Corrupt(evidence) => {
                self.unmount(path)
                    .map_err(|e| NodeError::CorruptMountRecovery {
                        path: path.display().to_string(),
                        unmount: e.to_string(),
                        evidence,
                    })?;
                info!("unmounted existing corrupt mount point");
                Ok(false)
            }
        }
    }

    /// Detach whatever is mounted at `path`. Idempotent.
    pub fn unmount(&self, path: &Path) -> Result<(), NodeError> {
        self.unmounter.unmount(&self.mounter, path)
    }

    /// Unmount `path` and remove the mount point directory.
    ///
    /// Cleanup is skipped if the unmount fails, since the target may still
    /// be busy.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn unmount_and_cleanup(&self, path: &Path) -> Result<(), NodeError> {
        // Only unmount here: stat-ing a dead NFS path can hang.
        info!("trying to unmount mount point");
        if let Err(e) = self.unmount(path) {
            warn!(error = %e, "failed to unmount during cleanup");
            return Err(e);
        }

        info!("trying to clean up mount point");
        self.mounter.cleanup_mount_point(path)
    }
}

/// Combine the mount table verdict with the I/O probe.
///
/// The probe only runs when the table check neither found the path missing
/// nor flagged corruption.  An ordinary table error is returned only if the
/// probe passes.
fn classify<F>(
    path: &Path,
    table: Result<bool, NodeError>,
    probe: F,
) -> Result<MountPointState, NodeError>
where
    F: FnOnce() -> std::io::Result<()>,
{
    let table = match table {
        Err(e) if e.is_not_found() => return Ok(MountPointState::Absent),
        Err(NodeError::CorruptMount { reason, .. }) => {
            warn!(path = %path.display(), %reason, "mount table reports corrupt mount point");
            return Ok(MountPointState::Corrupt(reason));
        }
        other => other,
    };

    if let Err(e) = probe() {
        warn!(path = %path.display(), error = %e, "mount point was identified as corrupt by opening and syncing");
        return Ok(MountPointState::Corrupt(e.to_string()));
    }

    match table {
        Ok(true) => Ok(MountPointState::Healthy),
        Ok(false) => Ok(MountPointState::Unmounted),
        Err(e) => Err(e),
    }
}

/// Make sure a directory exists at `path`.
///
/// Returns `true` if it had to be created.  An existing non-directory is a
/// hard error.
pub fn ensure_directory(path: &Path) -> Result<bool, NodeError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(false),
        Ok(_) => Err(NodeError::NotADirectory {
            path: path.display().to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(DIRECTORY_MODE)
                .create(path)
                .map_err(|e| NodeError::io(path, e))?;
            Ok(true)
        }
        Err(e) => Err(NodeError::io(path, e)),
    }
}
