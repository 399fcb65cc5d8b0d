//! Shared in-memory registry of hosted runs.
//!
//! Offer fan-out, status routing, and the admin API all read this map;
//! only admission, uninstall swaps, and removal write it. Readers iterate
//! a snapshot of handles taken under the shared lock and must not retain
//! run handles past the lock release.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::run::Run;

#[derive(Default)]
struct RunTable {
    runs: HashMap<String, Arc<dyn Run>>,
    /// Admission order; fan-out iterates runs in this order.
    order: Vec<String>,
    /// Whether the framework-level registration callback has fired.
    registered: bool,
}

impl RunTable {
    fn snapshot(&self) -> Vec<Arc<dyn Run>> {
        self.order
            .iter()
            .filter_map(|name| self.runs.get(name).cloned())
            .collect()
    }
}

/// Readers/writer-protected mapping of run name to run.
#[derive(Default)]
pub struct RunRegistry {
    table: RwLock<RunTable>,
}

/// Shared-lock view for iterating runs during a fan-out pass.
pub struct RunReadGuard<'a> {
    table: RwLockReadGuard<'a, RunTable>,
}

impl RunReadGuard<'_> {
    /// Copies out the current run handles in admission order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Run>> {
        self.table.snapshot()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.order.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.order.len()
    }
}

/// Exclusive-lock view for admission, uninstall swaps, and removal.
pub struct RunWriteGuard<'a> {
    table: RwLockWriteGuard<'a, RunTable>,
}

impl RunWriteGuard<'_> {
    /// Inserts a run under its name. Returns `false` (leaving the table
    /// unchanged) when the name is already present.
    pub fn try_insert(&mut self, run: Arc<dyn Run>) -> bool {
        let name = run.name().to_string();
        if self.table.runs.contains_key(&name) {
            return false;
        }
        self.table.order.push(name.clone());
        self.table.runs.insert(name, run);
        true
    }

    /// Returns the named run, or `None`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Run>> {
        self.table.runs.get(name).cloned()
    }

    /// Replaces the run under `name`, keeping its admission-order slot.
    /// No-op if the name is absent.
    pub fn replace(&mut self, name: &str, run: Arc<dyn Run>) {
        if self.table.runs.contains_key(name) {
            self.table.runs.insert(name.to_string(), run);
        }
    }

    /// Removes the named runs unconditionally; unknown names are ignored.
    /// Returns the number of runs remaining.
    pub fn remove(&mut self, names: &[String]) -> usize {
        let table = &mut *self.table;
        for name in names {
            table.runs.remove(name);
        }
        let runs = &table.runs;
        table.order.retain(|n| runs.contains_key(n));
        table.order.len()
    }

    /// Copies out the current run handles in admission order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Run>> {
        self.table.snapshot()
    }

    /// Whether the framework has registered.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.table.registered
    }

    /// Latches the framework-registered flag.
    pub fn set_registered(&mut self) {
        self.table.registered = true;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.order.is_empty()
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the shared lock for iteration.
    pub async fn read(&self) -> RunReadGuard<'_> {
        RunReadGuard {
            table: self.table.read().await,
        }
    }

    /// Acquires the exclusive lock for mutation.
    pub async fn write(&self) -> RunWriteGuard<'_> {
        RunWriteGuard {
            table: self.table.write().await,
        }
    }

    /// Returns the named run, or `None`.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Run>> {
        self.table.read().await.runs.get(name).cloned()
    }

    /// Returns all run names, sorted lexicographically.
    pub async fn names(&self) -> Vec<String> {
        let table = self.table.read().await;
        let mut names: Vec<String> = table.order.clone();
        names.sort();
        names
    }

    /// Number of hosted runs.
    pub async fn len(&self) -> usize {
        self.table.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.order.is_empty()
    }
}
