//! Active I/O health probe for mount points.
//!
//! Some broken mounts (disconnected NFS servers, stale handles) still show
//! up as healthy in the mount table, and even a directory listing can be
//! served from cache.  Only a real write forces the kernel to talk to the
//! backing filesystem, so the probe writes, reads back and deletes a small
//! sentinel file.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use scopeguard::defer;
use tracing::{debug, warn};

/// Name of the sentinel written inside a candidate mount point.
pub const SENTINEL_FILE: &str = ".rk8s-volume-mount-point-test.tmp";

/// Check that `path` answers directory enumeration and file I/O.
///
/// May block indefinitely on a wedged network mount; callers bound the
/// request as a whole.
pub fn check_mount_point_io(path: &Path) -> io::Result<()> {
    // Enumerating one entry is enough; an empty directory is fine.
    if let Some(entry) = std::fs::read_dir(path)?.next() {
        entry?;
    }

    let sentinel = path.join(SENTINEL_FILE);
    defer! {
        match std::fs::remove_file(&sentinel) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %sentinel.display(), error = %e, "failed to remove probe sentinel"),
        }
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o666)
        .custom_flags(nix::libc::O_SYNC)
        .open(&sentinel)?;

    let payload = sentinel.to_string_lossy();
    file.write_all(payload.as_bytes())?;
    file.seek(SeekFrom::Start(0))?;

    let mut readback = String::new();
    file.read_to_string(&mut readback)?;
    if readback != payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "probe sentinel read back different content",
        ));
    }

    debug!(path = %path.display(), "mount point I/O probe passed");
    Ok(())
}
