//! Node plugin configuration.
//!
//! Read once from the environment on first access.
//!
//! Environment variables:
//! - `CSI_NODE_FORCE_UMOUNT_TIMEOUT_SECS`: bound applied to a forced unmount.
//!   Defaults to `30`.
//! - `CSI_NODE_FORCED_CMD_PARAMS`: extra parameters injected in front of the
//!   arguments of specific external commands, written as
//!   `cmd=params;cmd2=params` (e.g. `blkid=-c /dev/null`). Defaults to empty.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use tracing::warn;

/// Default bound for a forced unmount.
pub const DEFAULT_FORCE_UMOUNT_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_FORCE_UMOUNT_TIMEOUT: &str = "CSI_NODE_FORCE_UMOUNT_TIMEOUT_SECS";
const ENV_FORCED_CMD_PARAMS: &str = "CSI_NODE_FORCED_CMD_PARAMS";

/// Process-wide node plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Timeout for [`crate::mount::Unmounter::Forced`].
    pub force_unmount_timeout: Duration,
    /// Command name -> parameters prepended by [`crate::exec::ForcedParamsExec`].
    pub forced_cmd_params: HashMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            force_unmount_timeout: DEFAULT_FORCE_UMOUNT_TIMEOUT,
            forced_cmd_params: HashMap::new(),
        }
    }
}

impl NodeConfig {
    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Malformed values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let force_unmount_timeout = match lookup(ENV_FORCE_UMOUNT_TIMEOUT) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!(key = ENV_FORCE_UMOUNT_TIMEOUT, value = %raw, "ignoring invalid timeout");
                    DEFAULT_FORCE_UMOUNT_TIMEOUT
                }
            },
            None => DEFAULT_FORCE_UMOUNT_TIMEOUT,
        };

        let forced_cmd_params = lookup(ENV_FORCED_CMD_PARAMS)
            .map(|raw| parse_forced_params(&raw))
            .unwrap_or_default();

        Self {
            force_unmount_timeout,
            forced_cmd_params,
        }
    }

    /// Build a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Parse `cmd=params;cmd2=params` into a map. Entries without `=` are skipped.
pub fn parse_forced_params(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            match entry.split_once('=') {
                Some((cmd, params)) if !cmd.trim().is_empty() => {
                    Some((cmd.trim().to_owned(), params.trim().to_owned()))
                }
                _ => {
                    warn!(key = ENV_FORCED_CMD_PARAMS, entry, "ignoring malformed entry");
                    None
                }
            }
        })
        .collect()
}

/// Globally initialized node configuration, read from environment variables at first access.
pub static NODE_CONFIG: LazyLock<NodeConfig> = LazyLock::new(NodeConfig::from_env);
