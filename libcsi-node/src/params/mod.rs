//! Volume parameter resolution.
//!
//! [`VolumeResolver::resolve`] turns the flat string map of a storage class
//! (or a CreateVolume request) into a validated [`VolumeDescriptor`].  It is a
//! pure function: no I/O, the same input always yields the same output.
//!
//! Unknown keys are ignored so older and newer callers can share a schema.
//! Known keys are parsed in a fixed order and the first failure is returned,
//! tagged with the offending key.

pub mod backing_image;
pub mod policy;

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::NodeError;
use crate::types::VolumeCapability;

pub use policy::{AccessMode, DataEngine, DataLocality, Frontend, ReplicaAutoBalance, Toggle};

// Option keys.
pub const KEY_NUMBER_OF_REPLICAS: &str = "numberOfReplicas";
pub const KEY_STALE_REPLICA_TIMEOUT: &str = "staleReplicaTimeout";
pub const KEY_SHARE: &str = "share";
pub const KEY_MIGRATABLE: &str = "migratable";
pub const KEY_ENCRYPTED: &str = "encrypted";
pub const KEY_REPLICA_AUTO_BALANCE: &str = "replicaAutoBalance";
pub const KEY_DATA_LOCALITY: &str = "dataLocality";
pub const KEY_DISABLE_REVISION_COUNTER: &str = "disableRevisionCounter";
pub const KEY_UNMAP_MARK_SNAP_CHAIN_REMOVED: &str = "unmapMarkSnapChainRemoved";
pub const KEY_REPLICA_SOFT_ANTI_AFFINITY: &str = "replicaSoftAntiAffinity";
pub const KEY_REPLICA_ZONE_SOFT_ANTI_AFFINITY: &str = "replicaZoneSoftAntiAffinity";
pub const KEY_REPLICA_DISK_SOFT_ANTI_AFFINITY: &str = "replicaDiskSoftAntiAffinity";
pub const KEY_FROM_BACKUP: &str = "fromBackup";
pub const KEY_BACKUP_TARGET_NAME: &str = "backupTargetName";
pub const KEY_DATA_SOURCE: &str = "dataSource";
pub const KEY_RECURRING_JOB_SELECTOR: &str = "recurringJobSelector";
pub const KEY_DISK_SELECTOR: &str = "diskSelector";
pub const KEY_NODE_SELECTOR: &str = "nodeSelector";
pub const KEY_DATA_ENGINE: &str = "dataEngine";
pub const KEY_FRONTEND: &str = "frontend";
pub const KEY_FREEZE_FILESYSTEM_FOR_SNAPSHOT: &str = "freezeFilesystemForSnapshot";

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Values applied when an option is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDefaults {
    /// Minutes; also used when the parsed value is not positive.
    pub stale_replica_timeout: i64,
    pub revision_counter_disabled: bool,
    pub data_engine: DataEngine,
    pub access_mode: AccessMode,
}

/// Stale replica timeout of 48 hours.
pub const DEFAULT_STALE_REPLICA_TIMEOUT: i64 = 2880;

/// The defaults used by [`resolve`].
pub const DEFAULTS: VolumeDefaults = VolumeDefaults {
    stale_replica_timeout: DEFAULT_STALE_REPLICA_TIMEOUT,
    revision_counter_disabled: true,
    data_engine: DataEngine::V1,
    access_mode: AccessMode::ReadWriteOnce,
};

impl Default for VolumeDefaults {
    fn default() -> Self {
        DEFAULTS
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Recurring job (or job group) a volume is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringJobSelector {
    pub name: String,
    #[serde(default)]
    pub is_group: bool,
}

/// Canonical, validated volume attributes forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeDescriptor {
    /// `None` lets the backend apply its own default.
    pub number_of_replicas: Option<u32>,
    /// Minutes.
    pub stale_replica_timeout: i64,
    pub access_mode: AccessMode,
    pub migratable: bool,
    pub encrypted: bool,
    pub replica_auto_balance: ReplicaAutoBalance,
    pub data_locality: Option<DataLocality>,
    pub revision_counter_disabled: bool,
    pub unmap_mark_snap_chain_removed: Toggle,
    pub replica_soft_anti_affinity: Toggle,
    pub replica_zone_soft_anti_affinity: Toggle,
    pub replica_disk_soft_anti_affinity: Toggle,
    pub from_backup: Option<String>,
    pub backup_target_name: Option<String>,
    pub data_source: Option<String>,
    pub backing_image: Option<String>,
    pub backing_image_data_source_type: Option<String>,
    pub backing_image_checksum: Option<String>,
    /// JSON object, see [`backing_image::fold`].
    pub backing_image_data_source_parameters: Option<String>,
    pub recurring_job_selector: Vec<RecurringJobSelector>,
    pub disk_selector: Vec<String>,
    pub node_selector: Vec<String>,
    pub data_engine: DataEngine,
    pub frontend: Option<Frontend>,
    pub freeze_filesystem_for_snapshot: Toggle,
}

impl VolumeDescriptor {
    /// A descriptor with every field at its default.
    pub fn with_defaults(defaults: &VolumeDefaults) -> Self {
        Self {
            number_of_replicas: None,
            stale_replica_timeout: defaults.stale_replica_timeout,
            access_mode: defaults.access_mode,
            migratable: false,
            encrypted: false,
            replica_auto_balance: ReplicaAutoBalance::default(),
            data_locality: None,
            revision_counter_disabled: defaults.revision_counter_disabled,
            unmap_mark_snap_chain_removed: Toggle::default(),
            replica_soft_anti_affinity: Toggle::default(),
            replica_zone_soft_anti_affinity: Toggle::default(),
            replica_disk_soft_anti_affinity: Toggle::default(),
            from_backup: None,
            backup_target_name: None,
            data_source: None,
            backing_image: None,
            backing_image_data_source_type: None,
            backing_image_checksum: None,
            backing_image_data_source_parameters: None,
            recurring_job_selector: Vec::new(),
            disk_selector: Vec::new(),
            node_selector: Vec::new(),
            data_engine: defaults.data_engine,
            frontend: None,
            freeze_filesystem_for_snapshot: Toggle::default(),
        }
    }

    /// Whether the volume is attached by more than one node.
    pub fn is_shared(&self) -> bool {
        self.access_mode == AccessMode::ReadWriteMany || self.migratable
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves option maps against a [`VolumeDefaults`] table.
#[derive(Debug, Clone, Default)]
pub struct VolumeResolver {
    defaults: VolumeDefaults,
}

impl VolumeResolver {
    pub fn new(defaults: VolumeDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &VolumeDefaults {
        &self.defaults
    }

    /// Build a [`VolumeDescriptor`] for `volume_id` from `options`.
    ///
    /// `migratable=true` on a volume that is not shared is downgraded to
    /// `false` with a log line rather than rejected.
    pub fn resolve(
        &self,
        volume_id: &str,
        options: &HashMap<String, String>,
    ) -> Result<VolumeDescriptor, NodeError> {
        let opts = Options(options);
        let mut vol = VolumeDescriptor::with_defaults(&self.defaults);

        if let Some(timeout) = opts.parse_with(KEY_STALE_REPLICA_TIMEOUT, parse_int::<i64>)? {
            vol.stale_replica_timeout = timeout;
        }
        if vol.stale_replica_timeout <= 0 {
            vol.stale_replica_timeout = self.defaults.stale_replica_timeout;
        }

        if let Some(shared) = opts.parse_with(KEY_SHARE, parse_bool)? {
            vol.access_mode = if shared {
                AccessMode::ReadWriteMany
            } else {
                AccessMode::ReadWriteOnce
            };
        }

        if let Some(mut migratable) = opts.parse_with(KEY_MIGRATABLE, parse_bool)? {
            if migratable && vol.access_mode != AccessMode::ReadWriteMany {
                info!(
                    volume_id,
                    access_mode = %vol.access_mode,
                    "cannot mark volume as migratable since access mode is not rwx, proceeding with non migratable volume"
                );
                migratable = false;
            }
            vol.migratable = migratable;
        }

        if let Some(encrypted) = opts.parse_with(KEY_ENCRYPTED, parse_bool)? {
            vol.encrypted = encrypted;
        }

        vol.number_of_replicas = opts.parse_with(KEY_NUMBER_OF_REPLICAS, parse_int::<u32>)?;

        if let Some(balance) = opts.parse(KEY_REPLICA_AUTO_BALANCE)? {
            vol.replica_auto_balance = balance;
        }

        vol.data_locality = opts.parse(KEY_DATA_LOCALITY)?;

        if let Some(disabled) = opts.parse_with(KEY_DISABLE_REVISION_COUNTER, parse_bool)? {
            vol.revision_counter_disabled = disabled;
        }

        // The engine decides which unmap settings are legal, so resolve it first.
        if let Some(engine) = opts.parse(KEY_DATA_ENGINE)? {
            vol.data_engine = engine;
        }

        if let Some(unmap) = opts.parse::<Toggle>(KEY_UNMAP_MARK_SNAP_CHAIN_REMOVED)? {
            if vol.data_engine == DataEngine::V2 && unmap == Toggle::Enabled {
                return Err(NodeError::invalid(
                    KEY_UNMAP_MARK_SNAP_CHAIN_REMOVED,
                    unmap.as_str(),
                    format!("not supported by data engine {}", vol.data_engine),
                ));
            }
            vol.unmap_mark_snap_chain_removed = unmap;
        }

        if let Some(v) = opts.parse(KEY_REPLICA_SOFT_ANTI_AFFINITY)? {
            vol.replica_soft_anti_affinity = v;
        }
        if let Some(v) = opts.parse(KEY_REPLICA_ZONE_SOFT_ANTI_AFFINITY)? {
            vol.replica_zone_soft_anti_affinity = v;
        }
        if let Some(v) = opts.parse(KEY_REPLICA_DISK_SOFT_ANTI_AFFINITY)? {
            vol.replica_disk_soft_anti_affinity = v;
        }

        vol.from_backup = opts.string(KEY_FROM_BACKUP);
        vol.backup_target_name = opts.string(KEY_BACKUP_TARGET_NAME);
        vol.data_source = opts.string(KEY_DATA_SOURCE);

        let backing = backing_image::fold(options)?;
        vol.backing_image = backing.name;
        vol.backing_image_data_source_type = backing.data_source_type;
        vol.backing_image_checksum = backing.checksum;
        vol.backing_image_data_source_parameters = backing.data_source_parameters;

        if let Some(raw) = opts.get(KEY_RECURRING_JOB_SELECTOR) {
            vol.recurring_job_selector = serde_json::from_str(raw).map_err(|e| {
                NodeError::invalid(
                    KEY_RECURRING_JOB_SELECTOR,
                    raw,
                    format!("invalid json format: {e}"),
                )
            })?;
        }

        if let Some(raw) = opts.get(KEY_DISK_SELECTOR) {
            vol.disk_selector = split_list(raw);
        }
        if let Some(raw) = opts.get(KEY_NODE_SELECTOR) {
            vol.node_selector = split_list(raw);
        }

        vol.frontend = opts.parse(KEY_FRONTEND)?;

        if let Some(freeze) = opts.parse(KEY_FREEZE_FILESYSTEM_FOR_SNAPSHOT)? {
            vol.freeze_filesystem_for_snapshot = freeze;
        }

        Ok(vol)
    }
}

/// Resolve `options` with the built-in [`DEFAULTS`].
pub fn resolve(
    volume_id: &str,
    options: &HashMap<String, String>,
) -> Result<VolumeDescriptor, NodeError> {
    VolumeResolver::default().resolve(volume_id, options)
}

/// Whether a volume must be attached in shared (multi-node) mode.
///
/// A volume that is already shared or migratable stays shared no matter what
/// the caller asks for now; otherwise a multi-node capability upgrades it.
pub fn requires_shared_access(
    volume: Option<&VolumeDescriptor>,
    capability: Option<&VolumeCapability>,
) -> bool {
    let shared_volume = volume.is_some_and(VolumeDescriptor::is_shared);
    let multi_node_request = capability.is_some_and(|c| c.access_mode.is_multi_node());
    shared_volume || multi_node_request
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Typed accessors over the raw option map.
struct Options<'a>(&'a HashMap<String, String>);

impl Options<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_owned)
    }

    fn parse_with<T, E, F>(&self, key: &str, parse: F) -> Result<Option<T>, NodeError>
    where
        F: FnOnce(&str) -> Result<T, E>,
        E: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| parse(raw).map_err(|e| NodeError::invalid(key, raw, e)))
            .transpose()
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, NodeError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.parse_with(key, str::parse::<T>)
    }
}

/// Boolean grammar of the storage class API.
fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err("not a boolean".to_owned()),
    }
}

fn parse_int<T>(raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| e.to_string())
}

/// Comma-separated list; blank entries are dropped.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapabilityAccessMode;

    fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn resolve_pairs(pairs: &[(&str, &str)]) -> Result<VolumeDescriptor, NodeError> {
        resolve("pvc-test", &opts(pairs))
    }

    #[test]
    fn empty_map_yields_defaults() {
        let vol = resolve_pairs(&[]).unwrap();
        assert_eq!(vol, VolumeDescriptor::with_defaults(&DEFAULTS));
        assert_eq!(vol.stale_replica_timeout, 2880);
        assert!(vol.revision_counter_disabled);
        assert_eq!(vol.data_engine, DataEngine::V1);
        assert_eq!(vol.access_mode, AccessMode::ReadWriteOnce);
        assert!(vol.backing_image_data_source_parameters.is_none());
    }

    #[test]
    fn migratable_without_share_is_downgraded() {
        let vol = resolve_pairs(&[("migratable", "true")]).unwrap();
        assert!(!vol.migratable);
        assert_eq!(vol.access_mode, AccessMode::ReadWriteOnce);
    }

    #[test]
    fn migratable_with_share_is_kept() {
        let vol = resolve_pairs(&[("migratable", "true"), ("share", "true")]).unwrap();
        assert!(vol.migratable);
        assert_eq!(vol.access_mode, AccessMode::ReadWriteMany);
    }

    #[test]
    fn non_positive_stale_timeout_uses_default() {
        for raw in ["0", "-5"] {
            let vol = resolve_pairs(&[("staleReplicaTimeout", raw)]).unwrap();
            assert_eq!(vol.stale_replica_timeout, 2880);
        }
        let vol = resolve_pairs(&[("staleReplicaTimeout", "30")]).unwrap();
        assert_eq!(vol.stale_replica_timeout, 30);
    }

    #[test]
    fn custom_defaults_table() {
        let resolver = VolumeResolver::new(VolumeDefaults {
            stale_replica_timeout: 60,
            revision_counter_disabled: false,
            data_engine: DataEngine::V2,
            access_mode: AccessMode::ReadWriteOnce,
        });
        let vol = resolver
            .resolve("pvc", &opts(&[("staleReplicaTimeout", "0")]))
            .unwrap();
        assert_eq!(vol.stale_replica_timeout, 60);
        assert!(!vol.revision_counter_disabled);
        assert_eq!(vol.data_engine, DataEngine::V2);
    }

    #[test]
    fn backing_image_folding() {
        let vol = resolve_pairs(&[("backingImageName", "img1"), ("backingImageFoo", "bar")]).unwrap();
        assert_eq!(vol.backing_image.as_deref(), Some("img1"));
        let params: HashMap<String, String> =
            serde_json::from_str(vol.backing_image_data_source_parameters.as_deref().unwrap())
                .unwrap();
        assert_eq!(params, opts(&[("Foo", "bar")]));
    }

    #[test]
    fn invalid_values_name_the_field() {
        let cases = [
            ("staleReplicaTimeout", "soon"),
            ("share", "yes"),
            ("migratable", "maybe"),
            ("encrypted", "TrUe"),
            ("numberOfReplicas", "-1"),
            ("replicaAutoBalance", "always"),
            ("dataLocality", "local"),
            ("disableRevisionCounter", "nope"),
            ("unmapMarkSnapChainRemoved", "on"),
            ("replicaSoftAntiAffinity", "true"),
            ("replicaZoneSoftAntiAffinity", "x"),
            ("replicaDiskSoftAntiAffinity", "x"),
            ("recurringJobSelector", "[{"),
            ("dataEngine", "v3"),
            ("frontend", "scsi"),
            ("freezeFilesystemForSnapshot", "sometimes"),
        ];
        for (key, value) in cases {
            match resolve_pairs(&[(key, value)]) {
                Err(NodeError::InvalidParameter { field, value: raw, .. }) => {
                    assert_eq!(field, key);
                    assert_eq!(raw, value);
                }
                other => panic!("{key}={value}: expected InvalidParameter, got {other:?}"),
            }
        }
    }

    #[test]
    fn first_error_wins() {
        let err = resolve_pairs(&[("staleReplicaTimeout", "x"), ("share", "x")]).unwrap_err();
        assert!(matches!(err, NodeError::InvalidParameter { ref field, .. } if field == "staleReplicaTimeout"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let vol = resolve_pairs(&[("fsType", "xfs"), ("someFutureKey", "1")]).unwrap();
        assert_eq!(vol, VolumeDescriptor::with_defaults(&DEFAULTS));
    }

    #[test]
    fn full_option_set() {
        let vol = resolve_pairs(&[
            ("numberOfReplicas", "3"),
            ("share", "True"),
            ("encrypted", "1"),
            ("replicaAutoBalance", "best-effort"),
            ("dataLocality", "strict-local"),
            ("disableRevisionCounter", "false"),
            ("replicaSoftAntiAffinity", "enabled"),
            ("replicaZoneSoftAntiAffinity", "disabled"),
            ("replicaDiskSoftAntiAffinity", "ignored"),
            ("fromBackup", "s3://bucket?backup=b1"),
            ("backupTargetName", "default"),
            ("dataSource", "vol://src"),
            ("recurringJobSelector", r#"[{"name":"snap","isGroup":true},{"name":"daily"}]"#),
            ("diskSelector", "ssd, fast,"),
            ("nodeSelector", "storage"),
            ("dataEngine", "v2"),
            ("unmapMarkSnapChainRemoved", "disabled"),
            ("frontend", "nvmf"),
            ("freezeFilesystemForSnapshot", "enabled"),
        ])
        .unwrap();

        assert_eq!(vol.number_of_replicas, Some(3));
        assert_eq!(vol.access_mode, AccessMode::ReadWriteMany);
        assert!(vol.encrypted);
        assert_eq!(vol.replica_auto_balance, ReplicaAutoBalance::BestEffort);
        assert_eq!(vol.data_locality, Some(DataLocality::StrictLocal));
        assert!(!vol.revision_counter_disabled);
        assert_eq!(vol.replica_soft_anti_affinity, Toggle::Enabled);
        assert_eq!(vol.replica_zone_soft_anti_affinity, Toggle::Disabled);
        assert_eq!(vol.replica_disk_soft_anti_affinity, Toggle::Ignored);
        assert_eq!(vol.from_backup.as_deref(), Some("s3://bucket?backup=b1"));
        assert_eq!(vol.backup_target_name.as_deref(), Some("default"));
        assert_eq!(vol.data_source.as_deref(), Some("vol://src"));
        assert_eq!(
            vol.recurring_job_selector,
            vec![
                RecurringJobSelector { name: "snap".into(), is_group: true },
                RecurringJobSelector { name: "daily".into(), is_group: false },
            ]
        );
        assert_eq!(vol.disk_selector, vec!["ssd", "fast"]);
        assert_eq!(vol.node_selector, vec!["storage"]);
        assert_eq!(vol.data_engine, DataEngine::V2);
        assert_eq!(vol.unmap_mark_snap_chain_removed, Toggle::Disabled);
        assert_eq!(vol.frontend, Some(Frontend::Nvmf));
        assert_eq!(vol.freeze_filesystem_for_snapshot, Toggle::Enabled);
    }

    #[test]
    fn v2_engine_rejects_unmap_enabled() {
        let err = resolve_pairs(&[("dataEngine", "v2"), ("unmapMarkSnapChainRemoved", "enabled")])
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidParameter { ref field, .. } if field == "unmapMarkSnapChainRemoved"));
        assert!(resolve_pairs(&[("unmapMarkSnapChainRemoved", "enabled")]).is_ok());
    }

    #[test]
    fn descriptor_serializes_camel_case() {
        let vol = resolve_pairs(&[("share", "true")]).unwrap();
        let json = serde_json::to_value(&vol).unwrap();
        assert_eq!(json["accessMode"], "rwx");
        assert_eq!(json["staleReplicaTimeout"], 2880);
        assert_eq!(json["dataEngine"], "v1");
    }

    #[test]
    fn shared_volume_always_requires_shared_access() {
        let shared = resolve_pairs(&[("share", "true")]).unwrap();
        for mode in [
            CapabilityAccessMode::Unknown,
            CapabilityAccessMode::SingleNodeWriter,
            CapabilityAccessMode::SingleNodeSingleWriter,
        ] {
            let cap = VolumeCapability { access_mode: mode, ..Default::default() };
            assert!(requires_shared_access(Some(&shared), Some(&cap)));
        }
        assert!(requires_shared_access(Some(&shared), None));
    }

    #[test]
    fn migratable_volume_requires_shared_access() {
        let mut vol = resolve_pairs(&[]).unwrap();
        vol.migratable = true;
        assert!(requires_shared_access(Some(&vol), None));
    }

    #[test]
    fn multi_node_capability_upgrades_single_writer_volume() {
        let vol = resolve_pairs(&[]).unwrap();
        let single = VolumeCapability {
            access_mode: CapabilityAccessMode::SingleNodeWriter,
            ..Default::default()
        };
        assert!(!requires_shared_access(Some(&vol), Some(&single)));
        assert!(!requires_shared_access(None, None));

        for mode in [
            CapabilityAccessMode::MultiNodeReaderOnly,
            CapabilityAccessMode::MultiNodeSingleWriter,
            CapabilityAccessMode::MultiNodeMultiWriter,
        ] {
            let cap = VolumeCapability { access_mode: mode, ..Default::default() };
            assert!(requires_shared_access(Some(&vol), Some(&cap)));
            assert!(requires_shared_access(None, Some(&cap)));
        }
    }
}
