//! Folding of `backingImage*` storage class parameters.
//!
//! The name, data source type and checksum become top-level volume fields.
//! Every other key in the namespace is handed to the backend as a single
//! JSON object under the data source parameters field, keyed by the suffix
//! after the prefix (`backingImageUrl` -> `"Url"`).

use std::collections::{BTreeMap, HashMap};

use crate::error::NodeError;

/// Namespace shared by every backing image key.
pub const PREFIX: &str = "backingImage";
/// Backing image name.
pub const NAME: &str = "backingImage";
/// Accepted alias of [`NAME`].
pub const NAME_ALIAS: &str = "backingImageName";
pub const DATA_SOURCE_TYPE: &str = "backingImageDataSourceType";
pub const CHECKSUM: &str = "backingImageChecksum";
/// Pre-serialized data source parameters supplied by the caller.
pub const DATA_SOURCE_PARAMETERS: &str = "backingImageDataSourceParameters";

/// Backing image fields extracted from the option map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackingImageFields {
    pub name: Option<String>,
    pub data_source_type: Option<String>,
    pub checksum: Option<String>,
    /// JSON object of the remaining namespaced keys.
    pub data_source_parameters: Option<String>,
}

/// Split the `backingImage*` keys of `options` into lifted fields and the
/// data source parameter blob.
///
/// The blob is absent when no namespaced key is present at all, and `{}`
/// when only lifted keys are.  Keys are sorted so the output is stable.
pub fn fold(options: &HashMap<String, String>) -> Result<BackingImageFields, NodeError> {
    let mut fields = BackingImageFields::default();
    let mut parameters: BTreeMap<String, String> = BTreeMap::new();
    let mut extra: Vec<(&str, &str)> = Vec::new();
    let mut seen = false;

    for (key, value) in options {
        if !key.starts_with(PREFIX) {
            continue;
        }
        seen = true;
        match key.as_str() {
            NAME => fields.name = Some(value.clone()),
            NAME_ALIAS => {
                fields.name.get_or_insert_with(|| value.clone());
            }
            DATA_SOURCE_TYPE => fields.data_source_type = Some(value.clone()),
            CHECKSUM => fields.checksum = Some(value.clone()),
            DATA_SOURCE_PARAMETERS => {
                let base: BTreeMap<String, String> = serde_json::from_str(value)
                    .map_err(|e| NodeError::invalid(DATA_SOURCE_PARAMETERS, value, e))?;
                parameters.extend(base);
            }
            other => extra.push((&other[PREFIX.len()..], value.as_str())),
        }
    }

    if !seen {
        return Ok(fields);
    }

    // Individually supplied keys win over the pre-serialized blob.
    parameters.extend(extra.into_iter().map(|(k, v)| (k.to_owned(), v.to_owned())));
    let blob = serde_json::to_string(&parameters)
        .map_err(|e| NodeError::invalid(DATA_SOURCE_PARAMETERS, "", e))?;
    fields.data_source_parameters = Some(blob);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn lifts_known_keys_and_blobs_the_rest() {
        let fields = fold(&opts(&[
            ("backingImage", "img1"),
            ("backingImageDataSourceType", "download"),
            ("backingImageChecksum", "abc123"),
            ("backingImageUrl", "https://example.com/img.qcow2"),
            ("numberOfReplicas", "3"),
        ]))
        .unwrap();

        assert_eq!(fields.name.as_deref(), Some("img1"));
        assert_eq!(fields.data_source_type.as_deref(), Some("download"));
        assert_eq!(fields.checksum.as_deref(), Some("abc123"));
        assert_eq!(
            fields.data_source_parameters.as_deref(),
            Some(r#"{"Url":"https://example.com/img.qcow2"}"#)
        );
    }

    #[test]
    fn name_alias_and_empty_blob() {
        let fields = fold(&opts(&[("backingImageName", "img1")])).unwrap();
        assert_eq!(fields.name.as_deref(), Some("img1"));
        assert_eq!(fields.data_source_parameters.as_deref(), Some("{}"));
    }

    #[test]
    fn canonical_name_beats_alias() {
        let fields = fold(&opts(&[("backingImageName", "alias"), ("backingImage", "real")])).unwrap();
        assert_eq!(fields.name.as_deref(), Some("real"));
    }

    #[test]
    fn no_namespaced_keys() {
        let fields = fold(&opts(&[("share", "true")])).unwrap();
        assert_eq!(fields, BackingImageFields::default());
    }

    #[test]
    fn explicit_blob_is_merged() {
        let fields = fold(&opts(&[
            ("backingImageDataSourceParameters", r#"{"Url":"old","Token":"t"}"#),
            ("backingImageUrl", "new"),
        ]))
        .unwrap();
        assert_eq!(
            fields.data_source_parameters.as_deref(),
            Some(r#"{"Token":"t","Url":"new"}"#)
        );
    }

    #[test]
    fn malformed_blob_is_rejected() {
        let err = fold(&opts(&[("backingImageDataSourceParameters", "not json")])).unwrap_err();
        assert!(matches!(err, NodeError::InvalidParameter { ref field, .. } if field == DATA_SOURCE_PARAMETERS));
    }
}
