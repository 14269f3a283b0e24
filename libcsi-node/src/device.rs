//! Block device helpers.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::SFlag;
use tracing::{debug, info};

use crate::error::NodeError;
use crate::exec::{CommandRunner, render};

/// Reported by [`get_disk_format`] when the device carries a partition table.
pub const PARTITIONED_DISK_FORMAT: &str = "unknown data, probably partitions";

/// `blkid` exits with this status when it finds no known signature.
const BLKID_NOTHING_FOUND: i32 = 2;

/// Return `true` if `path` is a block device.
///
/// Stat failures (including a missing path) are errors, not `false`.
pub fn is_block_device(path: &Path) -> Result<bool, NodeError> {
    let st = nix::sys::stat::stat(path).map_err(|e| match e {
        nix::errno::Errno::ENOENT => NodeError::NotFound {
            path: path.display().to_string(),
        },
        e => NodeError::Io {
            path: path.display().to_string(),
            reason: format!("stat: {e}"),
        },
    })?;
    let kind = SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT;
    Ok(kind == SFlag::S_IFBLK)
}

/// Probe `device` for an existing filesystem.
///
/// Returns the filesystem type, an empty string for an unformatted device,
/// or [`PARTITIONED_DISK_FORMAT`] when only a partition table is found.
pub fn get_disk_format(runner: &dyn CommandRunner, device: &Path) -> Result<String, NodeError> {
    let device = device.to_string_lossy();
    let args = [
        "-p", "-s", "TYPE", "-s", "PTTYPE", "-o", "export", &*device,
    ];
    let output = runner.run("blkid", &args)?;

    match output.code {
        Some(0) => {}
        Some(BLKID_NOTHING_FOUND) => {
            debug!(%device, "device is unformatted");
            return Ok(String::new());
        }
        code => {
            return Err(NodeError::CommandFailed {
                command: render("blkid", &args),
                code,
                output: output.combined(),
            });
        }
    }

    let format = parse_blkid_export(&output.combined())?;
    info!(%device, format = %format, "detected disk format");
    Ok(format)
}

/// Parse `blkid -o export` output into a format string.
fn parse_blkid_export(output: &str) -> Result<String, NodeError> {
    let mut fs_type = "";
    let mut pt_type = "";
    for line in output.lines().filter(|l| !l.is_empty()) {
        let mut parts = line.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(NodeError::CommandFailed {
                command: "blkid".to_owned(),
                code: Some(0),
                output: format!("blkid returns invalid output: {output}"),
            });
        };
        // TYPE is the filesystem, PTTYPE the partition table.
        match key {
            "TYPE" => fs_type = value,
            "PTTYPE" => pt_type = value,
            _ => {}
        }
    }

    if !pt_type.is_empty() {
        return Ok(PARTITIONED_DISK_FORMAT.to_owned());
    }
    Ok(fs_type.to_owned())
}

/// Create an empty file at `path`. An existing file or directory is fine.
pub fn make_file(path: &Path) -> Result<(), NodeError> {
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(path)
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        // Opening a directory for writing fails with EISDIR.
        Err(e) if e.raw_os_error() == Some(nix::libc::EISDIR) => Ok(()),
        Err(e) => Err(NodeError::io(path, e)),
    }
}

/// Where a block volume is staged: `<staging>/<volume_id>`.
pub fn stage_block_volume_path(staging_target_path: &Path, volume_id: &str) -> PathBuf {
    staging_target_path.join(volume_id)
}
