//! Run lifecycle management on top of the registry.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::registry::{RunReadGuard, RunRegistry};
use crate::run::{Run, RunMode};

/// Errors from run-manager operations.
#[derive(Debug, Error)]
pub enum RunManagerError {
    #[error("run named '{0}' is already present")]
    Duplicate(String),
}

/// Lifecycle façade over the run registry: admission, uninstall
/// conversion, and removal, with registration fan-in.
///
/// Uninstall flow: `start_uninstall` converts the run to its uninstalling
/// replacement, which flags its own state namespace. The replacement keeps
/// getting offer passes until it has released everything, at which point it
/// answers `Uninstalled` and the router removes it. If the process restarts
/// mid-uninstall, recovery re-admits the run already in uninstall mode and
/// the cleanup resumes where it left off.
pub struct RunManager {
    registry: Arc<RunRegistry>,
}

impl RunManager {
    pub fn new(registry: Arc<RunRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Acquires the shared lock for fan-out iteration.
    pub async fn read(&self) -> RunReadGuard<'_> {
        self.registry.read().await
    }

    /// Admits a run under its name.
    ///
    /// If registration has already happened, the run's `registered(false)`
    /// is invoked immediately so it can initialize.
    pub async fn put(&self, run: Arc<dyn Run>) -> Result<(), RunManagerError> {
        let mut guard = self.registry.write().await;
        let name = run.name().to_string();
        info!(run = %name, total = guard.len() + 1, "Adding run");
        if !guard.try_insert(run.clone()) {
            return Err(RunManagerError::Duplicate(name));
        }
        if guard.is_registered() {
            run.registered(false).await;
        }
        Ok(())
    }

    /// Returns the named run, or `None`.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Run>> {
        self.registry.get(name).await
    }

    /// Returns all run names, sorted lexicographically.
    pub async fn names(&self) -> Vec<String> {
        self.registry.names().await
    }

    /// Converts the named runs to their uninstalling replacements.
    ///
    /// Unknown names and runs that are already uninstalling are logged and
    /// skipped; the conversion is one-way and happens at most once per run.
    pub async fn start_uninstall(&self, names: &[String]) {
        let mut guard = self.registry.write().await;
        info!(runs = ?names, total = guard.len(), "Marking runs as uninstalling");
        for name in names {
            let Some(current) = guard.get(name) else {
                warn!(run = %name, "Run does not exist, cannot trigger uninstall");
                continue;
            };
            if current.mode() == RunMode::Uninstalling {
                warn!(run = %name, "Run is already uninstalling, leaving as-is");
                continue;
            }
            let replacement = match current.to_uninstall() {
                Ok(replacement) => replacement,
                Err(e) => {
                    // The run still answers FINISHED on the next pass, so
                    // the conversion is retried then.
                    warn!(run = %name, error = %e, "Failed to switch run to uninstall");
                    continue;
                }
            };
            if guard.is_registered() {
                replacement.registered(false).await;
            }
            guard.replace(name, replacement);
        }
    }

    /// Removes the named runs after uninstall has completed. Unknown names
    /// are ignored. Returns the number of runs still present.
    pub async fn remove(&self, names: &[String]) -> usize {
        let mut guard = self.registry.write().await;
        info!(runs = ?names, total = guard.len(), "Removing uninstalled runs");
        guard.remove(names)
    }

    /// Notifies every hosted run that (re-)registration has occurred, and
    /// latches the flag so future admissions are notified on arrival.
    pub async fn registered(&self, re_registered: bool) {
        let mut guard = self.registry.write().await;
        guard.set_registered();
        let runs = guard.snapshot();
        info!(runs = runs.len(), re_registered, "Notifying runs of registration");
        for run in runs {
            run.registered(re_registered).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::IdleRun;
    use crate::state::RunStateStore;
    use crate::storage::MemoryPersister;

    fn manager() -> RunManager {
        RunManager::new(Arc::new(RunRegistry::new()))
    }

    fn idle(name: &str) -> Arc<dyn Run> {
        let persister = Arc::new(MemoryPersister::new());
        Arc::new(IdleRun::new(name, RunStateStore::new(persister, name)))
    }

    #[tokio::test]
    async fn put_rejects_duplicates() {
        let manager = manager();
        manager.put(idle("alpha")).await.unwrap();
        let err = manager.put(idle("alpha")).await.unwrap_err();
        assert!(matches!(err, RunManagerError::Duplicate(name) if name == "alpha"));
    }

    #[tokio::test]
    async fn names_lexicographic() {
        let manager = manager();
        for name in ["zeta", "alpha", "mike"] {
            manager.put(idle(name)).await.unwrap();
        }
        assert_eq!(
            manager.names().await,
            vec!["alpha".to_string(), "mike".to_string(), "zeta".to_string()]
        );
    }

    #[tokio::test]
    async fn start_uninstall_swaps_mode_once() {
        let manager = manager();
        manager.put(idle("alpha")).await.unwrap();

        manager.start_uninstall(&["alpha".to_string()]).await;
        let run = manager.get("alpha").await.unwrap();
        assert_eq!(run.mode(), RunMode::Uninstalling);

        // Second trigger leaves the replacement in place.
        manager.start_uninstall(&["alpha".to_string()]).await;
        let again = manager.get("alpha").await.unwrap();
        assert!(Arc::ptr_eq(&run, &again));
    }

    #[tokio::test]
    async fn start_uninstall_unknown_name_is_noop() {
        let manager = manager();
        manager.start_uninstall(&["ghost".to_string()]).await;
        assert!(manager.names().await.is_empty());
    }

    #[tokio::test]
    async fn remove_returns_remaining_count() {
        let manager = manager();
        manager.put(idle("a")).await.unwrap();
        manager.put(idle("b")).await.unwrap();
        assert_eq!(manager.remove(&["a".to_string()]).await, 1);
        assert_eq!(manager.remove(&["b".to_string()]).await, 0);
    }
}
