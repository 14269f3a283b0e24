//! # libcsi-node — node-side volume plumbing for RK8s CSI plugins
//!
//! `libcsi-node` holds the two pieces of a CSI node plugin that do real work
//! on the host before and after the backend attaches a volume:
//!
//! * a **mount lifecycle engine** that tells a healthy mount point from a
//!   missing or silently corrupted one (stale NFS handles, disconnected
//!   network mounts), recovers corrupt mounts by unmounting them, and tears
//!   mount points down idempotently;
//! * a **volume parameter resolver** that validates a storage class option
//!   map into a typed volume descriptor.
//!
//! Everything is synchronous and stateless; callers bring their own worker
//! threads and request timeouts.  Logging goes through `tracing`, errors
//! through the [`NodeError`] enum.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`mount`] | [`MountManager`], the [`Mounter`] backend trait and [`LinuxMounter`]. |
//! | [`params`] | [`VolumeResolver`], [`VolumeDescriptor`], [`requires_shared_access`]. |
//! | [`device`] | Block device detection and disk format probing. |
//! | [`stats`] | [`FilesystemStatistics`] from `statfs(2)`. |
//! | [`exec`] | [`CommandRunner`] and [`ForcedParamsExec`]. |
//! | [`config`] | Environment-driven [`NodeConfig`]. |
//! | [`types`] | Capabilities and [`MountPointState`]. |
//! | [`error`] | [`NodeError`] enum covering all failure modes. |

pub mod config;
pub mod device;
pub mod error;
pub mod exec;
pub mod mount;
pub mod params;
pub mod stats;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use config::{NODE_CONFIG, NodeConfig};
pub use device::{get_disk_format, is_block_device, make_file, stage_block_volume_path};
pub use error::NodeError;
pub use exec::{CommandOutput, CommandRunner, ForcedParamsExec, OsExec};
pub use mount::linux::LinuxMounter;
pub use mount::{MountManager, Mounter, Unmounter, ensure_directory};
pub use params::{VolumeDescriptor, VolumeResolver, requires_shared_access, resolve};
pub use stats::{FilesystemStatistics, get_filesystem_statistics};
pub use types::*;
