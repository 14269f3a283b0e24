//! [`Mounter`] backed by Linux syscalls and `/proc/self/mounts`.

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use nix::errno::Errno;
use nix::mount::MntFlags;
use tracing::{debug, warn};

use super::Mounter;
use crate::error::NodeError;

const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Errno values returned by `stat(2)` on a mount whose backend is gone.
const CORRUPT_MOUNT_ERRNOS: [i32; 5] = [
    nix::libc::ENOTCONN,
    nix::libc::ESTALE,
    nix::libc::EIO,
    nix::libc::EACCES,
    nix::libc::EHOSTDOWN,
];

/// Host mount backend.
#[derive(Debug, Clone)]
pub struct LinuxMounter {
    /// Mount table to consult, normally `/proc/self/mounts`.
    mounts_file: PathBuf,
}

impl Default for LinuxMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxMounter {
    pub fn new() -> Self {
        Self::with_mounts_file(PROC_MOUNTS)
    }

    /// Use an alternative mount table file.
    pub fn with_mounts_file(mounts_file: impl Into<PathBuf>) -> Self {
        Self {
            mounts_file: mounts_file.into(),
        }
    }

    /// Return `true` if `path` is listed as a mount point in the mount table.
    fn listed_in_mount_table(&self, path: &Path) -> Result<bool, NodeError> {
        let contents = std::fs::read_to_string(&self.mounts_file)
            .map_err(|e| NodeError::io(&self.mounts_file, e))?;
        Ok(parse_mount_points(&contents).iter().any(|mp| mp == path))
    }
}

/// Classify a stat failure on a candidate mount point.
fn stat_error(path: &Path, e: std::io::Error) -> NodeError {
    match e.raw_os_error() {
        Some(code) if CORRUPT_MOUNT_ERRNOS.contains(&code) => NodeError::CorruptMount {
            path: path.display().to_string(),
            reason: e.to_string(),
        },
        _ => NodeError::io(path, e),
    }
}

/// `umount(2)` reports EINVAL for a path that is not a mount point and
/// ENOENT for a missing one; both mean there is nothing to do.
fn unmount_error(path: &Path, errno: Errno) -> NodeError {
    match errno {
        Errno::EINVAL | Errno::ENOENT => NodeError::NotMounted {
            path: path.display().to_string(),
        },
        e => NodeError::UnmountFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        },
    }
}

/// Extract the mount point column from a `/proc/*/mounts` style table.
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`, with
/// whitespace inside fields written as octal escapes (`\040`).
pub fn parse_mount_points(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

fn unescape_octal(field: &str) -> OsString {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = bytes[i + 1..=i + 3]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    OsString::from_vec(out)
}

impl Mounter for LinuxMounter {
    fn is_mount_point(&self, path: &Path) -> Result<bool, NodeError> {
        let meta = std::fs::metadata(path).map_err(|e| stat_error(path, e))?;

        // A different device than the parent means something is mounted here.
        if let Some(parent) = path.parent()
            && let Ok(parent_meta) = std::fs::metadata(parent)
            && parent_meta.dev() != meta.dev()
        {
            return Ok(true);
        }

        // Bind mounts share the parent's device; fall back to the table.
        let canonical = std::fs::canonicalize(path).map_err(|e| stat_error(path, e))?;
        self.listed_in_mount_table(&canonical)
    }

    fn unmount(&self, path: &Path) -> Result<(), NodeError> {
        nix::mount::umount(path).map_err(|e| unmount_error(path, e))
    }

    fn supports_force_unmount(&self) -> bool {
        true
    }

    /// Try a plain unmount first; if it has not returned within `timeout`,
    /// issue `umount2(MNT_FORCE)`.
    ///
    /// The plain unmount runs on a helper thread that cannot be cancelled.
    /// After a timeout it stays blocked in `umount(2)` until the kernel gives
    /// up, so each wedged unmount costs one parked thread.
    fn force_unmount(&self, path: &Path, timeout: Duration) -> Result<(), NodeError> {
        let (tx, rx) = mpsc::channel();
        let target = path.to_path_buf();
        std::thread::spawn(move || {
            let _ = tx.send(nix::mount::umount(target.as_path()));
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|e| unmount_error(path, e)),
            Err(RecvTimeoutError::Timeout) => {
                warn!(path = %path.display(), ?timeout, "timed out waiting for unmount, retrying with MNT_FORCE");
                nix::mount::umount2(path, MntFlags::MNT_FORCE).map_err(|e| unmount_error(path, e))
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(path = %path.display(), "unmount thread exited without a result");
                Err(NodeError::UnmountFailed {
                    path: path.display().to_string(),
                    reason: "unmount thread exited without a result".to_owned(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_mount_table() {
        let table = "\
proc /proc proc rw,nosuid 0 0
/dev/sdb /var/lib/kubelet/pods/a\\040b/volumes ext4 rw 0 0
malformed
";
        let points = parse_mount_points(table);
        assert_eq!(
            points,
            vec![
                PathBuf::from("/proc"),
                PathBuf::from("/var/lib/kubelet/pods/a b/volumes"),
            ]
        );
    }

    #[test]
    fn unescape_keeps_lone_backslash() {
        assert_eq!(unescape_octal("a\\b"), OsString::from("a\\b"));
        assert_eq!(unescape_octal("tab\\011x"), OsString::from("tab\tx"));
        assert_eq!(unescape_octal("end\\04"), OsString::from("end\\04"));
    }

    #[test]
    fn missing_path_is_not_found() {
        let mounter = LinuxMounter::new();
        let err = mounter
            .is_mount_point(Path::new("/nonexistent/mount/point"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn plain_directory_is_not_a_mount_point() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("target");
        std::fs::create_dir(&dir).unwrap();

        let empty_table = tempfile::NamedTempFile::new().unwrap();
        let mounter = LinuxMounter::with_mounts_file(empty_table.path());
        assert!(!mounter.is_mount_point(&dir).unwrap());
    }

    #[test]
    fn mount_table_entry_marks_mount_point() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bind target");
        std::fs::create_dir(&dir).unwrap();
        let canonical = std::fs::canonicalize(&dir).unwrap();
        let escaped = canonical.to_string_lossy().replace(' ', "\\040");

        let mut table = tempfile::NamedTempFile::new().unwrap();
        writeln!(table, "/dev/sdc {escaped} ext4 rw 0 0").unwrap();

        let mounter = LinuxMounter::with_mounts_file(table.path());
        assert!(mounter.is_mount_point(&dir).unwrap());
    }

    #[test]
    fn unmount_errno_mapping() {
        let p = Path::new("/mnt/x");
        assert!(unmount_error(p, Errno::EINVAL).is_not_mounted());
        assert!(unmount_error(p, Errno::ENOENT).is_not_mounted());
        assert!(matches!(
            unmount_error(p, Errno::EBUSY),
            NodeError::UnmountFailed { .. }
        ));
    }

    #[test]
    fn stale_handle_is_corrupt() {
        let e = std::io::Error::from_raw_os_error(nix::libc::ESTALE);
        assert!(stat_error(Path::new("/mnt/nfs"), e).is_corrupt_mount());
        let e = std::io::Error::from_raw_os_error(nix::libc::ENOTCONN);
        assert!(stat_error(Path::new("/mnt/nfs"), e).is_corrupt_mount());
        let e = std::io::Error::from_raw_os_error(nix::libc::ENOENT);
        assert!(stat_error(Path::new("/mnt/nfs"), e).is_not_found());
    }
}
