//! Shared node-side types: requested capabilities and mount point state.
//!
//! These mirror the subset of the CSI data model the node engines consume.
//! They are [`Serialize`]/[`Deserialize`] so the outer handler can decode
//! them straight from its request payloads.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Access mode requested by a CSI volume capability.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapabilityAccessMode {
    /// The caller did not say.
    #[default]
    Unknown,
    /// Single-node read-write.
    SingleNodeWriter,
    /// Single-node read-only.
    SingleNodeReaderOnly,
    /// Multi-node read-only.
    MultiNodeReaderOnly,
    /// Multi-node, one writer.
    MultiNodeSingleWriter,
    /// Multi-node, many writers.
    MultiNodeMultiWriter,
    /// Single pod read-write.
    SingleNodeSingleWriter,
    /// Several pods on one node, read-write.
    SingleNodeMultiWriter,
}

impl CapabilityAccessMode {
    /// True for the modes that let more than one node attach the volume.
    pub fn is_multi_node(self) -> bool {
        matches!(
            self,
            Self::MultiNodeReaderOnly | Self::MultiNodeSingleWriter | Self::MultiNodeMultiWriter
        )
    }
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    #[serde(default)]
    pub access_mode: CapabilityAccessMode,
    /// Raw block access instead of a mounted filesystem.
    #[serde(default)]
    pub block: bool,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type for mount access.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
}

fn default_fs_type() -> String {
    "ext4".to_owned()
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: CapabilityAccessMode::Unknown,
            block: false,
            mount_flags: Vec::new(),
            fs_type: default_fs_type(),
        }
    }
}

// ---------------------------------------------------------------------------
// Mount point state
// ---------------------------------------------------------------------------

/// Health of a candidate mount point, computed fresh on every check.
///
/// Lifecycle of a single mount point:
///
/// ```text
/// Absent -> (create dir) -> Unmounted -> (external mount) -> Healthy
/// Healthy -> (I/O probe fails) -> Corrupt -> (forced unmount) -> Unmounted
/// Unmounted -> (cleanup) -> Absent
/// ```
///
/// There is no edge from `Corrupt` back to `Healthy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountPointState {
    /// The path does not exist.
    Absent,
    /// The path exists and answers I/O but nothing is mounted on it.
    Unmounted,
    /// A mount is present and passed the I/O probe.
    Healthy,
    /// The mount table or the I/O probe reported corruption.
    Corrupt(String),
}

impl MountPointState {
    /// Whether the path can be used as-is without a fresh mount.
    pub fn is_mounted(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}
