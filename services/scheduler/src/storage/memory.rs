//! In-memory persister for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{child_names, Persister, PersisterError};

/// Persister holding every record in a sorted in-memory map.
#[derive(Default)]
pub struct MemoryPersister {
    records: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored paths, sorted. Handy for asserting on layout in tests.
    pub fn paths(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Persister for MemoryPersister {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, PersisterError> {
        Ok(self.lock().get(path).cloned())
    }

    fn set(&self, path: &str, value: &[u8]) -> Result<(), PersisterError> {
        self.lock().insert(path.to_string(), value.to_vec());
        Ok(())
    }

    fn get_many(&self, paths: &[String]) -> Result<BTreeMap<String, Vec<u8>>, PersisterError> {
        let records = self.lock();
        Ok(paths
            .iter()
            .filter_map(|p| records.get(p).map(|v| (p.clone(), v.clone())))
            .collect())
    }

    fn set_many(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<(), PersisterError> {
        let mut records = self.lock();
        for (path, value) in entries {
            records.insert(path.clone(), value.clone());
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), PersisterError> {
        self.lock().remove(path);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<(), PersisterError> {
        let lead = format!("{prefix}/");
        self.lock()
            .retain(|path, _| path != prefix && !path.starts_with(&lead));
        Ok(())
    }

    fn children(&self, prefix: &str) -> Result<Vec<String>, PersisterError> {
        let records = self.lock();
        Ok(child_names(prefix, records.keys().map(String::as_str)))
    }
}
