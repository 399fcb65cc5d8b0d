//! Per-run state namespaces.
//!
//! Every hosted run owns a private namespace under `Services/<name>`; the
//! scheduler stores the spec back-reference and the uninstall flag there,
//! and runs store their framework id and task records. Erasing the
//! namespace is how an uninstall finishes.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use flotilla_offers::FrameworkId;

use crate::storage::{join_path, Persister, PersisterError};

/// Root path for all per-run namespaces.
pub const SERVICES_ROOT: &str = "Services";

const PROPERTIES_NAME: &str = "Properties";
const TASKS_NAME: &str = "Tasks";
const FRAMEWORK_ID_NAME: &str = "FrameworkID";

/// Property holding the run's spec back-reference.
pub const SPEC_ID_PROPERTY: &str = "spec-id";

/// Property flagging that the run is uninstalling. Present (any value)
/// means the flag is set; a restart reconstructs the run directly in
/// uninstall mode.
pub const UNINSTALLING_PROPERTY: &str = "uninstalling";

/// Property recording when the run was submitted (RFC 3339).
pub const SUBMITTED_AT_PROPERTY: &str = "submitted-at";

/// Errors from run-state operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("property not found: {0}")]
    PropertyNotFound(String),

    #[error(transparent)]
    Storage(#[from] PersisterError),
}

/// Handle to one run's namespace in the persister.
#[derive(Clone)]
pub struct RunStateStore {
    persister: Arc<dyn Persister>,
    namespace: String,
    run_name: String,
}

impl RunStateStore {
    /// Opens the namespace for the named run. Nothing is written until the
    /// first store call.
    pub fn new(persister: Arc<dyn Persister>, run_name: &str) -> Self {
        Self {
            persister,
            namespace: join_path(&[SERVICES_ROOT, run_name]),
            run_name: run_name.to_string(),
        }
    }

    /// Lists the run names that have a namespace in the persister.
    pub fn list_namespaces(persister: &dyn Persister) -> Result<Vec<String>, PersisterError> {
        persister.children(SERVICES_ROOT)
    }

    /// The run this namespace belongs to.
    #[must_use]
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Stores a property value.
    pub fn store_property(&self, name: &str, value: &[u8]) -> Result<(), StateError> {
        self.persister.set(&self.property_path(name), value)?;
        Ok(())
    }

    /// Fetches a property value. Missing properties are an error; use
    /// [`fetch_property_opt`](Self::fetch_property_opt) when absence is
    /// expected.
    pub fn fetch_property(&self, name: &str) -> Result<Vec<u8>, StateError> {
        self.fetch_property_opt(name)?
            .ok_or_else(|| StateError::PropertyNotFound(format!("{}/{name}", self.run_name)))
    }

    /// Fetches a property value, or `None` when absent.
    pub fn fetch_property_opt(&self, name: &str) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.persister.get(&self.property_path(name))?)
    }

    /// Deletes a property. Deleting a missing property is a no-op.
    pub fn delete_property(&self, name: &str) -> Result<(), StateError> {
        self.persister.delete(&self.property_path(name))?;
        Ok(())
    }

    /// Whether the uninstall flag is set.
    pub fn is_uninstalling(&self) -> Result<bool, StateError> {
        Ok(self.fetch_property_opt(UNINSTALLING_PROPERTY)?.is_some())
    }

    /// Sets the uninstall flag. Idempotent.
    pub fn set_uninstalling(&self) -> Result<(), StateError> {
        self.store_property(UNINSTALLING_PROPERTY, b"1")
    }

    /// Stores the framework id assigned on registration.
    pub fn store_framework_id(&self, id: &FrameworkId) -> Result<(), StateError> {
        self.persister
            .set(&self.framework_id_path(), id.as_str().as_bytes())?;
        Ok(())
    }

    /// Fetches the stored framework id, or `None` before first registration.
    pub fn fetch_framework_id(&self) -> Result<Option<FrameworkId>, StateError> {
        let bytes = self.persister.get(&self.framework_id_path())?;
        Ok(bytes.map(|b| FrameworkId::new(String::from_utf8_lossy(&b).into_owned())))
    }

    /// Stores a task record.
    pub fn store_task(&self, task_name: &str, record: &[u8]) -> Result<(), StateError> {
        self.persister.set(&self.task_path(task_name), record)?;
        Ok(())
    }

    /// Fetches a task record, or `None`.
    pub fn fetch_task(&self, task_name: &str) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.persister.get(&self.task_path(task_name))?)
    }

    /// Lists stored task names, sorted.
    pub fn task_names(&self) -> Result<Vec<String>, StateError> {
        Ok(self
            .persister
            .children(&join_path(&[&self.namespace, TASKS_NAME]))?)
    }

    /// Stores several task records in one round trip.
    pub fn store_tasks(&self, records: &BTreeMap<String, Vec<u8>>) -> Result<(), StateError> {
        let entries: BTreeMap<String, Vec<u8>> = records
            .iter()
            .map(|(name, record)| (self.task_path(name), record.clone()))
            .collect();
        self.persister.set_many(&entries)?;
        Ok(())
    }

    /// Erases the entire namespace. The final act of an uninstall.
    pub fn clear(&self) -> Result<(), StateError> {
        self.persister.delete_prefix(&self.namespace)?;
        Ok(())
    }

    fn property_path(&self, name: &str) -> String {
        join_path(&[&self.namespace, PROPERTIES_NAME, name])
    }

    fn task_path(&self, task_name: &str) -> String {
        join_path(&[&self.namespace, TASKS_NAME, task_name])
    }

    fn framework_id_path(&self) -> String {
        join_path(&[&self.namespace, FRAMEWORK_ID_NAME])
    }
}
