//! Persisted cache index (`metadata.json`)
//!
//! `{key: {source_path, cache_path, size, created_at, last_accessed}}`, times in
//! seconds since the epoch. `last_accessed` is maintained here on every cache
//! hit instead of relying on filesystem access times.

use super::identity::split_key;
use super::CacheError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub source_path: String,
    pub cache_path: String,
    pub size: u64,
    pub created_at: f64,
    pub last_accessed: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheIndex {
    entries: IndexMap<String, CacheRecord>,
}

impl CacheIndex {
    /// Load the index; a missing or unreadable file yields an empty index
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse cache metadata {:?}: {}", path, e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to load cache metadata {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&CacheRecord> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, record: CacheRecord) {
        self.entries.insert(key, record);
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheRecord> {
        self.entries.shift_remove(key)
    }

    /// Update `last_accessed`; returns false for unknown keys
    pub fn touch(&mut self, key: &str, now: f64) -> bool {
        match self.entries.get_mut(key) {
            Some(record) => {
                record.last_accessed = now;
                true
            }
            None => false,
        }
    }

    /// Keys recorded for `source_path` under `variant`, other than `current`
    pub fn superseded_keys(&self, source_path: &str, variant: &str, current: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(key, record)| {
                key.as_str() != current
                    && record.source_path == source_path
                    && split_key(key).map(|(_, v)| v) == Some(variant)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Drop records whose key is not in `present`
    pub fn retain_keys(&mut self, present: &[String]) {
        self.entries.retain(|key, _| present.iter().any(|k| k == key));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(source: &str) -> CacheRecord {
        CacheRecord {
            source_path: source.to_string(),
            cache_path: "/cache/x.png".to_string(),
            size: 10,
            created_at: 1.0,
            last_accessed: 1.0,
        }
    }

    fn key(digit: char, variant: &str) -> String {
        format!("{}{}", digit.to_string().repeat(64), variant)
    }

    #[test]
    fn test_superseded_keys_match_source_and_variant() {
        let mut index = CacheIndex::default();
        index.insert(key('a', "_full"), record("/a.psd"));
        index.insert(key('b', "_full"), record("/a.psd"));
        index.insert(key('c', "_preview"), record("/a.psd"));
        index.insert(key('d', "_full"), record("/other.psd"));

        let stale = index.superseded_keys("/a.psd", "_full", &key('b', "_full"));
        assert_eq!(stale, vec![key('a', "_full")]);
    }

    #[test]
    fn test_touch_updates_access_time() {
        let mut index = CacheIndex::default();
        index.insert(key('a', ""), record("/a.psd"));

        assert!(index.touch(&key('a', ""), 42.0));
        assert_eq!(index.get(&key('a', "")).unwrap().last_accessed, 42.0);
        assert!(!index.touch("missing", 1.0));
    }

    #[test]
    fn test_save_and_load_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        let mut index = CacheIndex::default();
        index.insert(key('a', "_full"), record("/a.psd"));
        index.save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &json[key('a', "_full")];
        assert_eq!(entry["source_path"], "/a.psd");
        assert_eq!(entry["size"], 10);

        let loaded = CacheIndex::load(&path);
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_corrupt_index_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(CacheIndex::load(&path).is_empty());
    }
}
