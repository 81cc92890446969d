//! Deep merge of opaque YAML values
//!
//! Build-tool sections are not modelled by the schema, so they are merged
//! structurally:
//!
//! - mappings merge recursively, the incoming side winning per key,
//! - sequences are replaced wholesale,
//! - scalars are replaced,
//! - an incoming `null` leaves the existing value alone,
//! - a mapping meeting a non-mapping is a conflict.

use log::debug;
use serde_yaml::Value as YamlValue;

use super::child_key;
use crate::error::{Error, Result};

/// Recursively merge `source` into `target`.
///
/// `path` is the dotted location of `target` and is used in log and error
/// messages only.
pub fn merge_values(target: &mut YamlValue, source: YamlValue, path: &str) -> Result<()> {
    if source.is_null() {
        return Ok(());
    }
    if target.is_null() {
        *target = source;
        return Ok(());
    }

    if target.is_mapping() != source.is_mapping() {
        return Err(Error::MergeConflict {
            key: path.to_string(),
            message: format!(
                "cannot merge {} into {}",
                get_yaml_type_name(&source),
                get_yaml_type_name(target)
            ),
        });
    }

    match (target, source) {
        (YamlValue::Mapping(target_map), YamlValue::Mapping(source_map)) => {
            for (key, value) in source_map {
                let key_str = match &key {
                    YamlValue::String(s) => s.clone(),
                    other => format!("{:?}", other),
                };
                let new_path = child_key(path, &key_str);

                match target_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value, &new_path)?,
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (existing, other) => {
            if let (Some(old), Some(new)) = (existing.as_sequence(), other.as_sequence()) {
                debug!(
                    "Replacing list at '{}' (old size: {}, new size: {})",
                    path,
                    old.len(),
                    new.len()
                );
            } else {
                debug!("Overwriting value at '{}'", path);
            }
            *existing = other;
        }
    }
    Ok(())
}

/// Get a human-readable name for a YAML value's type
pub fn get_yaml_type_name(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "null",
        YamlValue::Bool(_) => "boolean",
        YamlValue::Number(_) => "number",
        YamlValue::String(_) => "string",
        YamlValue::Sequence(_) => "sequence",
        YamlValue::Mapping(_) => "mapping",
        YamlValue::Tagged(_) => "tagged value",
    }
}
