//! Enumerated volume policies accepted in storage class parameters.
//!
//! Each enum parses from and serializes to the exact wire string the
//! backend API uses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant, )+
        }

        impl $name {
            /// Every accepted wire value, in declaration order.
            pub const VALUES: &'static [&'static str] = &[$($wire),+];

            /// The wire representation.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $wire, )+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $wire => Ok(Self::$variant), )+
                    other => Err(format!(
                        "unsupported value {other:?}, expected one of {:?}",
                        Self::VALUES
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Backend access mode of a volume.
    #[derive(Default)]
    pub enum AccessMode {
        /// Single writer.
        #[default]
        ReadWriteOnce => "rwo",
        /// Shared across nodes.
        ReadWriteMany => "rwx",
    }
}

wire_enum! {
    /// Storage engine implementation.
    #[derive(Default)]
    pub enum DataEngine {
        #[default]
        V1 => "v1",
        V2 => "v2",
    }
}

wire_enum! {
    /// How the volume is exposed on the node.
    pub enum Frontend {
        Blockdev => "blockdev",
        Iscsi => "iscsi",
        Nvmf => "nvmf",
        Ublk => "ublk",
    }
}

wire_enum! {
    /// Whether a replica should be kept on the node consuming the volume.
    pub enum DataLocality {
        Disabled => "disabled",
        BestEffort => "best-effort",
        StrictLocal => "strict-local",
    }
}

wire_enum! {
    /// Replica rebalancing policy.
    #[derive(Default)]
    pub enum ReplicaAutoBalance {
        /// Follow the global setting.
        #[default]
        Ignored => "ignored",
        Disabled => "disabled",
        LeastEffort => "least-effort",
        BestEffort => "best-effort",
    }
}

wire_enum! {
    /// Tri-state toggle where `ignored` defers to the global setting.
    ///
    /// Used for replica (node, zone and disk) soft anti-affinity, snapshot
    /// chain unmapping and filesystem freeze on snapshot.
    #[derive(Default)]
    pub enum Toggle {
        #[default]
        Ignored => "ignored",
        Enabled => "enabled",
        Disabled => "disabled",
    }
}
