//! Durable parent map: `{source → {parent_id → cleaned section text}}`.
//!
//! Loaded once into memory at startup; every mutation goes through the
//! atomic-replace path. Children reference parents by id only, so this store
//! owns all parent texts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use siliqa_common::fsutil::write_json_atomic;
use siliqa_common::Result;
use tracing::info;

type ParentMap = HashMap<String, HashMap<String, String>>;

pub struct ParentStore {
    path: PathBuf,
    map: RwLock<ParentMap>,
}

impl ParentStore {
    /// Load the map from `path`, or start empty when the file is missing.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map: ParentMap = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            ParentMap::new()
        };
        info!(path = %path.display(), sources = map.len(), "parent map loaded");
        Ok(Self { path, map: RwLock::new(map) })
    }

    fn persist_locked(&self, map: &ParentMap) -> Result<()> {
        write_json_atomic(&self.path, map)
    }

    /// Replace the parent set for `source` and persist.
    pub fn insert_source(&self, source: &str, parents: HashMap<String, String>) -> Result<()> {
        let mut map = self.map.write().expect("parent map lock poisoned");
        map.insert(source.to_string(), parents);
        self.persist_locked(&map)
    }

    /// Full section text for a parent of a known source.
    pub fn get(&self, source: &str, parent_id: &str) -> Option<String> {
        self.map
            .read()
            .expect("parent map lock poisoned")
            .get(source)
            .and_then(|parents| parents.get(parent_id))
            .cloned()
    }

    /// Look a parent up across all sources.
    pub fn lookup(&self, parent_id: &str) -> Option<String> {
        let map = self.map.read().expect("parent map lock poisoned");
        map.values().find_map(|parents| parents.get(parent_id)).cloned()
    }

    /// Drop every parent of `source`; returns whether anything was removed.
    pub fn remove_source(&self, source: &str) -> Result<bool> {
        let mut map = self.map.write().expect("parent map lock poisoned");
        let removed = map.remove(source).is_some();
        if removed {
            self.persist_locked(&map)?;
        }
        Ok(removed)
    }

    /// Known source files, one entry per ingested document.
    pub fn sources(&self) -> Vec<String> {
        self.map
            .read()
            .expect("parent map lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Total number of parent sections across all sources.
    pub fn len(&self) -> usize {
        self.map
            .read()
            .expect("parent map lock poisoned")
            .values()
            .map(HashMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wipe the map and persist the empty state.
    pub fn clear(&self) -> Result<()> {
        let mut map = self.map.write().expect("parent map lock poisoned");
        map.clear();
        self.persist_locked(&map)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parents_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn insert_get_lookup_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParentStore::load(dir.path().join("parent_docs.json")).unwrap();

        store
            .insert_source("fc_ug.pdf", parents_of(&[("fc_ug.pdf_sec_000_A", "section text")]))
            .unwrap();

        assert_eq!(
            store.get("fc_ug.pdf", "fc_ug.pdf_sec_000_A").as_deref(),
            Some("section text")
        );
        assert_eq!(store.lookup("fc_ug.pdf_sec_000_A").as_deref(), Some("section text"));
        assert_eq!(store.len(), 1);

        assert!(store.remove_source("fc_ug.pdf").unwrap());
        assert!(!store.remove_source("fc_ug.pdf").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn map_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parent_docs.json");
        {
            let store = ParentStore::load(&path).unwrap();
            store
                .insert_source("pt_ug.pdf", parents_of(&[("pt_ug.pdf_sec_001_B", "timing")]))
                .unwrap();
        }
        let reloaded = ParentStore::load(&path).unwrap();
        assert_eq!(reloaded.lookup("pt_ug.pdf_sec_001_B").as_deref(), Some("timing"));
        assert_eq!(reloaded.sources(), vec!["pt_ug.pdf".to_string()]);
    }
}
