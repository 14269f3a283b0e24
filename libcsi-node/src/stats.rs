//! Filesystem usage statistics for a mounted volume.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Raw block and inode accounting as reported by `statfs(2)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatfsSnapshot {
    /// Fundamental block size in bytes.
    pub block_size: u64,
    /// Total data blocks.
    pub total_blocks: u64,
    /// Free blocks, including those reserved for privileged users.
    pub free_blocks: u64,
    /// Free blocks available to unprivileged users.
    pub available_blocks: u64,
    /// Total inodes.
    pub total_inodes: u64,
    /// Free inodes.
    pub free_inodes: u64,
}

/// Point-in-time usage of the filesystem holding a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemStatistics {
    pub available_bytes: u64,
    pub total_bytes: u64,
    pub used_bytes: u64,

    pub available_inodes: u64,
    pub total_inodes: u64,
    pub used_inodes: u64,
}

impl From<StatfsSnapshot> for FilesystemStatistics {
    /// Used bytes are `(total - free) * block_size`, not `total - available`:
    /// blocks reserved for root count as neither used nor available.
    ///
    /// Byte products wrap on overflow, so arbitrary snapshots never panic.
    fn from(s: StatfsSnapshot) -> Self {
        Self {
            available_bytes: s.available_blocks.wrapping_mul(s.block_size),
            total_bytes: s.total_blocks.wrapping_mul(s.block_size),
            used_bytes: s
                .total_blocks
                .saturating_sub(s.free_blocks)
                .wrapping_mul(s.block_size),

            available_inodes: s.free_inodes,
            total_inodes: s.total_inodes,
            used_inodes: s.total_inodes.saturating_sub(s.free_inodes),
        }
    }
}

/// Query `statfs(2)` for `path` and convert the result. Never cached.
pub fn get_filesystem_statistics(path: &Path) -> Result<FilesystemStatistics, NodeError> {
    let st = nix::sys::statfs::statfs(path).map_err(|e| NodeError::Io {
        path: path.display().to_string(),
        reason: format!("statfs: {e}"),
    })?;

    let snapshot = StatfsSnapshot {
        block_size: st.block_size() as u64,
        total_blocks: st.blocks() as u64,
        free_blocks: st.blocks_free() as u64,
        available_blocks: st.blocks_available() as u64,
        total_inodes: st.files() as u64,
        free_inodes: st.files_free() as u64,
    };
    Ok(snapshot.into())
}
