//! Key/value metadata shared by targets, distribution sets and software modules.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::quota;

const MAX_KEY_LEN: usize = 128;
const MAX_VALUE_LEN: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

fn validate_entry(key: &str, value: &str) -> EngineResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(EngineError::Validation(format!(
            "metadata key must be 1..={MAX_KEY_LEN} characters"
        )));
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(EngineError::Validation(format!(
            "metadata value for '{key}' exceeds {MAX_VALUE_LEN} characters"
        )));
    }
    Ok(())
}

/// Add a batch of new entries to `map`, all or nothing.
///
/// Fails without touching `map` if any key already exists, a key repeats
/// inside the batch, or the batch would exceed `limit`.
pub fn add_batch(
    map: &mut BTreeMap<String, String>,
    entries: &[MetadataEntry],
    parent: &str,
    limit: u64,
) -> EngineResult<()> {
    let mut seen = BTreeSet::new();
    for entry in entries {
        validate_entry(&entry.key, &entry.value)?;
        if map.contains_key(&entry.key) {
            return Err(EngineError::already_exists("metadata", &entry.key));
        }
        if !seen.insert(entry.key.as_str()) {
            return Err(EngineError::Validation(format!(
                "metadata key '{}' repeated in batch",
                entry.key
            )));
        }
    }
    quota::check_and_reserve("metadata", parent, map.len(), entries.len(), limit)?;
    for entry in entries {
        map.insert(entry.key.clone(), entry.value.clone());
    }
    Ok(())
}

/// Replace the value of an existing entry.
pub fn update_entry(map: &mut BTreeMap<String, String>, key: &str, value: &str) -> EngineResult<()> {
    validate_entry(key, value)?;
    match map.get_mut(key) {
        Some(existing) => {
            *existing = value.to_string();
            Ok(())
        }
        None => Err(EngineError::not_found("metadata", key)),
    }
}

pub fn remove_entry(map: &mut BTreeMap<String, String>, key: &str) -> EngineResult<()> {
    map.remove(key)
        .map(|_| ())
        .ok_or_else(|| EngineError::not_found("metadata", key))
}

pub fn to_entries(map: &BTreeMap<String, String>) -> Vec<MetadataEntry> {
    map.iter()
        .map(|(key, value)| MetadataEntry {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize, prefix: &str) -> Vec<MetadataEntry> {
        (0..n)
            .map(|i| MetadataEntry {
                key: format!("{prefix}{i}"),
                value: "v".into(),
            })
            .collect()
    }

    #[test]
    fn batch_over_quota_adds_nothing() {
        let mut map = BTreeMap::new();
        add_batch(&mut map, &entries(7, "a"), "ds/1", 10).unwrap();

        let err = add_batch(&mut map, &entries(5, "b"), "ds/1", 10).unwrap_err();
        assert!(matches!(err, EngineError::QuotaExceeded { .. }));
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn duplicate_key_rejects_batch() {
        let mut map = BTreeMap::new();
        add_batch(&mut map, &entries(1, "a"), "t/1", 10).unwrap();
        let mut batch = entries(2, "b");
        batch.push(MetadataEntry {
            key: "a0".into(),
            value: "x".into(),
        });
        assert!(matches!(
            add_batch(&mut map, &batch, "t/1", 10),
            Err(EngineError::AlreadyExists { .. })
        ));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn repeated_key_in_batch_is_invalid() {
        let mut map = BTreeMap::new();
        let mut batch = entries(1, "a");
        batch.push(batch[0].clone());
        assert!(matches!(
            add_batch(&mut map, &batch, "t/1", 10),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn update_and_remove() {
        let mut map = BTreeMap::new();
        add_batch(&mut map, &entries(1, "k"), "t/1", 10).unwrap();
        update_entry(&mut map, "k0", "new").unwrap();
        assert_eq!(map["k0"], "new");
        assert!(update_entry(&mut map, "missing", "x").is_err());
        remove_entry(&mut map, "k0").unwrap();
        assert!(remove_entry(&mut map, "k0").is_err());
    }
}
