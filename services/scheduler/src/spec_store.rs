//! Content-addressed persistence of submitted run specs.
//!
//! The original submission bytes are kept as-is so that improvements to
//! spec parsing are inherited by existing runs on restart, and so
//! operators can inspect exactly what was submitted. Identical
//! submissions share a single record.
//!
//! Layout:
//!
//! ```text
//! Specs/<specId>/Type    spec type label
//! Specs/<specId>/Data    raw submission bytes
//! ```
//!
//! Each run's namespace carries a `spec-id` property pointing back at its
//! spec; recovery walks those properties to rebuild the hosted runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info};

use crate::generator::{GeneratorError, GeneratorMap};
use crate::run::Run;
use crate::state::{RunStateStore, StateError, SPEC_ID_PROPERTY};
use crate::storage::{join_path, Persister, PersisterError};

const SPECS_ROOT: &str = "Specs";
const TYPE_NAME: &str = "Type";
const DATA_NAME: &str = "Data";

/// Errors from spec-store operations.
#[derive(Debug, Error)]
pub enum SpecStoreError {
    #[error("spec type cannot be empty")]
    EmptyType,

    #[error("spec data cannot be empty")]
    EmptyData,

    /// An existing record under the same id holds different bytes. Either
    /// the storage was tampered with or sha256 collided; both warrant
    /// refusing the submission.
    #[error("data mismatch between existing record and submission for spec id {0}")]
    Mismatch(String),

    /// Recovery found corrupt or unresolvable service data. Every problem
    /// is logged before this is returned.
    #[error("{} error(s) recovering stored runs; see log for details", .0.len())]
    Recovery(Vec<String>),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Storage(#[from] PersisterError),
}

/// Content-addressed spec storage.
pub struct SpecStore {
    persister: Arc<dyn Persister>,
}

impl SpecStore {
    pub fn new(persister: Arc<dyn Persister>) -> Self {
        Self { persister }
    }

    /// Computes the id for a (type, data) submission:
    /// `<type>-<hex(sha256(data))>`. Identical submissions share an id,
    /// and the id doubles as a cheap equality witness.
    #[must_use]
    pub fn spec_id(spec_type: &str, data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{spec_type}-{:x}", hasher.finalize())
    }

    /// Stores the submission against the run's namespace.
    ///
    /// The spec record is written first (reusing an existing byte-equal
    /// record when present), then the run's `spec-id` property. There is
    /// no transaction across the two, so recovery treats a namespace
    /// without a `spec-id` as corrupt rather than silently skipping it.
    pub fn store(
        &self,
        run_state: &RunStateStore,
        data: &[u8],
        spec_type: &str,
    ) -> Result<String, SpecStoreError> {
        if spec_type.is_empty() {
            return Err(SpecStoreError::EmptyType);
        }
        if data.is_empty() {
            return Err(SpecStoreError::EmptyData);
        }

        let spec_id = Self::spec_id(spec_type, data);
        let type_path = spec_type_path(&spec_id);
        let data_path = spec_data_path(&spec_id);

        let existing = self
            .persister
            .get_many(&[type_path.clone(), data_path.clone()])?;
        let stored_type = existing.get(&type_path);
        let stored_data = existing.get(&data_path);
        match (stored_type, stored_data) {
            (None, None) => {
                info!(bytes = data.len(), spec_type, spec_id = %spec_id, "Storing new spec");
                let mut entries = BTreeMap::new();
                entries.insert(type_path, spec_type.as_bytes().to_vec());
                entries.insert(data_path, data.to_vec());
                self.persister.set_many(&entries)?;
            }
            (stored_type, stored_data) => {
                info!(bytes = data.len(), spec_type, spec_id = %spec_id, "Verifying existing spec");
                let type_matches =
                    stored_type.is_some_and(|t| t.as_slice() == spec_type.as_bytes());
                let data_matches = stored_data.is_some_and(|d| d.as_slice() == data);
                if !type_matches || !data_matches {
                    error!(
                        spec_id = %spec_id,
                        "Mismatch between stored record and submission"
                    );
                    return Err(SpecStoreError::Mismatch(spec_id));
                }
            }
        }

        run_state.store_property(SPEC_ID_PROPERTY, spec_id.as_bytes())?;
        Ok(spec_id)
    }

    /// Returns the run's spec back-reference, or `None` if it was never
    /// stored.
    pub fn spec_id_of(&self, run_state: &RunStateStore) -> Result<Option<String>, SpecStoreError> {
        let bytes = run_state.fetch_property_opt(SPEC_ID_PROPERTY)?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Rebuilds all previously admitted runs from storage.
    ///
    /// Every service namespace must carry a `spec-id` pointing at a spec
    /// with both Type and Data present, and the Type must have a matching
    /// generator. Problems are logged as they are found and accumulated;
    /// if any occurred within a phase, the whole call fails after that
    /// phase so operators see the complete damage report instead of the
    /// first casualty.
    pub async fn recover(
        &self,
        generators: &GeneratorMap,
    ) -> Result<Vec<Arc<dyn Run>>, SpecStoreError> {
        let mut errors: Vec<String> = Vec::new();

        // Scrape every service namespace for its spec back-reference.
        let mut service_to_spec_id: BTreeMap<String, String> = BTreeMap::new();
        for service in RunStateStore::list_namespaces(self.persister.as_ref())? {
            let state = RunStateStore::new(self.persister.clone(), &service);
            match state.fetch_property_opt(SPEC_ID_PROPERTY)? {
                Some(bytes) => {
                    service_to_spec_id
                        .insert(service, String::from_utf8_lossy(&bytes).into_owned());
                }
                None => {
                    // The property is written at admission and only
                    // removed with the whole namespace; absence means
                    // corrupt service data.
                    let msg = format!("service '{service}' is missing its spec-id property");
                    error!("{msg}");
                    errors.push(msg);
                }
            }
        }
        info!(services = service_to_spec_id.len(), "Found stored services");
        if !errors.is_empty() {
            return Err(SpecStoreError::Recovery(errors));
        }

        // Batch-fetch the distinct specs they reference.
        let mut distinct_spec_ids: Vec<String> =
            service_to_spec_id.values().cloned().collect();
        distinct_spec_ids.sort();
        distinct_spec_ids.dedup();

        let mut specs: BTreeMap<String, (String, Vec<u8>)> = BTreeMap::new();
        for spec_id in &distinct_spec_ids {
            let type_path = spec_type_path(spec_id);
            let data_path = spec_data_path(spec_id);
            let entries = self
                .persister
                .get_many(&[type_path.clone(), data_path.clone()])?;
            match (entries.get(&type_path), entries.get(&data_path)) {
                (Some(spec_type), Some(data)) => {
                    specs.insert(
                        spec_id.clone(),
                        (
                            String::from_utf8_lossy(spec_type).into_owned(),
                            data.clone(),
                        ),
                    );
                }
                _ => {
                    let msg = format!("spec '{spec_id}' is missing its Type or Data record");
                    error!("{msg}");
                    errors.push(msg);
                }
            }
        }
        info!(specs = specs.len(), "Retrieved stored specs");
        if !errors.is_empty() {
            return Err(SpecStoreError::Recovery(errors));
        }

        // Regenerate each service through its type's generator.
        let mut runs: Vec<Arc<dyn Run>> = Vec::new();
        for (service, spec_id) in &service_to_spec_id {
            let (spec_type, data) = &specs[spec_id];
            let Some(generator) = generators.get(spec_type) else {
                let msg = format!(
                    "no generator of type '{spec_type}' for spec '{spec_id}' (service '{service}')"
                );
                error!("{msg}");
                errors.push(msg);
                continue;
            };
            runs.push(generator.generate(data).await?);
        }
        info!(
            runs = ?runs.iter().map(|r| r.name()).collect::<Vec<_>>(),
            "Recovered services"
        );
        if !errors.is_empty() {
            return Err(SpecStoreError::Recovery(errors));
        }

        Ok(runs)
    }
}

/// `Specs/<specId>/Type`
fn spec_type_path(spec_id: &str) -> String {
    join_path(&[SPECS_ROOT, spec_id, TYPE_NAME])
}

/// `Specs/<specId>/Data`
fn spec_data_path(spec_id: &str) -> String {
    join_path(&[SPECS_ROOT, spec_id, DATA_NAME])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{JsonGenerator, JSON_SPEC_TYPE};
    use crate::run::RunMode;
    use crate::storage::MemoryPersister;

    fn setup() -> (Arc<MemoryPersister>, SpecStore) {
        let persister = Arc::new(MemoryPersister::new());
        let store = SpecStore::new(persister.clone());
        (persister, store)
    }

    fn state(persister: &Arc<MemoryPersister>, name: &str) -> RunStateStore {
        RunStateStore::new(persister.clone(), name)
    }

    #[test]
    fn spec_id_is_type_dash_sha256() {
        // sha256("hello")
        assert_eq!(
            SpecStore::spec_id("yaml", b"hello"),
            "yaml-2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn store_writes_spec_and_back_reference() {
        let (persister, store) = setup();
        let run_state = state(&persister, "alpha");

        let spec_id = store.store(&run_state, b"hello", "yaml").unwrap();
        assert_eq!(
            store.spec_id_of(&run_state).unwrap().unwrap(),
            spec_id.clone()
        );
        assert_eq!(
            persister
                .get(&spec_type_path(&spec_id))
                .unwrap()
                .unwrap(),
            b"yaml"
        );
        assert_eq!(
            persister.get(&spec_data_path(&spec_id)).unwrap().unwrap(),
            b"hello"
        );
    }

    #[test]
    fn store_rejects_empty_inputs() {
        let (persister, store) = setup();
        let run_state = state(&persister, "alpha");
        assert!(matches!(
            store.store(&run_state, b"hello", ""),
            Err(SpecStoreError::EmptyType)
        ));
        assert!(matches!(
            store.store(&run_state, b"", "yaml"),
            Err(SpecStoreError::EmptyData)
        ));
    }

    #[test]
    fn identical_submissions_share_one_record() {
        let (persister, store) = setup();
        let s1 = state(&persister, "s1");
        let s2 = state(&persister, "s2");

        let id1 = store.store(&s1, b"hello", "yaml").unwrap();
        let id2 = store.store(&s2, b"hello", "yaml").unwrap();
        assert_eq!(id1, id2);

        let spec_paths: Vec<String> = persister
            .paths()
            .into_iter()
            .filter(|p| p.starts_with("Specs/"))
            .collect();
        assert_eq!(
            spec_paths,
            vec![spec_data_path(&id1), spec_type_path(&id1)]
        );
        assert_eq!(store.spec_id_of(&s1).unwrap().unwrap(), id1);
        assert_eq!(store.spec_id_of(&s2).unwrap().unwrap(), id1);
    }

    #[test]
    fn mismatched_existing_record_is_rejected() {
        let (persister, store) = setup();
        let run_state = state(&persister, "alpha");

        let spec_id = store.store(&run_state, b"hello", "yaml").unwrap();
        // Corrupt the stored data out from under the id.
        persister.set(&spec_data_path(&spec_id), b"tampered").unwrap();

        assert!(matches!(
            store.store(&run_state, b"hello", "yaml"),
            Err(SpecStoreError::Mismatch(id)) if id == spec_id
        ));
        // The corrupt record is not overwritten.
        assert_eq!(
            persister.get(&spec_data_path(&spec_id)).unwrap().unwrap(),
            b"tampered"
        );
    }

    fn json_generators(persister: &Arc<MemoryPersister>) -> GeneratorMap {
        let mut generators: GeneratorMap = BTreeMap::new();
        generators.insert(
            JSON_SPEC_TYPE.to_string(),
            Arc::new(JsonGenerator::new(persister.clone())),
        );
        generators
    }

    #[tokio::test]
    async fn recover_rebuilds_stored_runs() {
        let (persister, store) = setup();
        store
            .store(&state(&persister, "alpha"), br#"{"name": "alpha"}"#, "json")
            .unwrap();
        store
            .store(&state(&persister, "beta"), br#"{"name": "beta"}"#, "json")
            .unwrap();
        // beta was mid-uninstall when the process died.
        state(&persister, "beta").set_uninstalling().unwrap();

        let runs = store.recover(&json_generators(&persister)).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].name(), "alpha");
        assert_eq!(runs[0].mode(), RunMode::Active);
        assert_eq!(runs[1].name(), "beta");
        assert_eq!(runs[1].mode(), RunMode::Uninstalling);
    }

    #[tokio::test]
    async fn recover_accumulates_all_missing_spec_ids() {
        let (persister, store) = setup();
        // Two namespaces with task data but no spec-id property.
        state(&persister, "alpha").store_task("t", b"x").unwrap();
        state(&persister, "beta").store_task("t", b"y").unwrap();

        let err = match store.recover(&json_generators(&persister)).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        match err {
            SpecStoreError::Recovery(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn recover_fails_on_unknown_generator_type() {
        let (persister, store) = setup();
        store
            .store(&state(&persister, "alpha"), b"spark-bytes", "spark")
            .unwrap();

        let err = match store.recover(&json_generators(&persister)).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, SpecStoreError::Recovery(errors) if errors.len() == 1));
    }

    #[tokio::test]
    async fn recover_fails_on_missing_spec_record() {
        let (persister, store) = setup();
        let run_state = state(&persister, "alpha");
        let spec_id = store
            .store(&run_state, br#"{"name": "alpha"}"#, "json")
            .unwrap();
        persister.delete(&spec_data_path(&spec_id)).unwrap();

        let err = match store.recover(&json_generators(&persister)).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, SpecStoreError::Recovery(errors) if errors.len() == 1));
    }

    #[tokio::test]
    async fn recover_empty_store_is_empty() {
        let (persister, store) = setup();
        let runs = store.recover(&json_generators(&persister)).await.unwrap();
        assert!(runs.is_empty());
    }
}
