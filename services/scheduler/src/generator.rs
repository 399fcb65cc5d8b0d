//! Run generators: named factories converting submission payloads into
//! hosted runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::run::{is_valid_run_name, IdleRun, Run};
use crate::state::{RunStateStore, StateError};
use crate::storage::Persister;
use crate::uninstall::UninstallRun;

/// Errors from run generation.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Converts raw submission bytes into a constructed run.
///
/// One generator is registered per spec type; the type label submitted
/// with the payload selects which generator builds the run. A generator is
/// also responsible for reconstructing its runs during recovery, including
/// resuming directly in uninstall mode when the run's namespace carries
/// the uninstall flag.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Builds a run from the submitted payload bytes.
    async fn generate(&self, data: &[u8]) -> Result<Arc<dyn Run>, GeneratorError>;

    /// Maximum accepted payload size in bytes; zero means no limit.
    fn max_data_size_bytes(&self) -> usize;
}

/// Registry of generators keyed by spec type.
pub type GeneratorMap = BTreeMap<String, Arc<dyn Generator>>;

/// Spec type handled by [`JsonGenerator`].
pub const JSON_SPEC_TYPE: &str = "json";

#[derive(Debug, Deserialize)]
struct JsonRunSpec {
    name: String,
}

/// Built-in generator for JSON payloads of the form `{"name": "..."}`.
///
/// Produces idle runs, which hold no reservations; it exists so the
/// scheduler can be driven end-to-end without an external plan engine.
/// Deployments register richer generators under their own types.
pub struct JsonGenerator {
    persister: Arc<dyn Persister>,
}

impl JsonGenerator {
    const MAX_DATA_SIZE_BYTES: usize = 512 * 1024;

    pub fn new(persister: Arc<dyn Persister>) -> Self {
        Self { persister }
    }
}

#[async_trait]
impl Generator for JsonGenerator {
    async fn generate(&self, data: &[u8]) -> Result<Arc<dyn Run>, GeneratorError> {
        let spec: JsonRunSpec = serde_json::from_slice(data)
            .map_err(|e| GeneratorError::InvalidPayload(e.to_string()))?;
        if !is_valid_run_name(&spec.name) {
            return Err(GeneratorError::InvalidPayload(format!(
                "run name '{}' must be non-empty alphanumeric-plus-hyphen",
                spec.name
            )));
        }

        let state = RunStateStore::new(self.persister.clone(), &spec.name);
        if state.is_uninstalling()? {
            // A restart interrupted this run's uninstall; resume it.
            let run = UninstallRun::resume(&spec.name, state, Vec::new())?;
            return Ok(Arc::new(run));
        }
        Ok(Arc::new(IdleRun::new(spec.name, state)))
    }

    fn max_data_size_bytes(&self) -> usize {
        Self::MAX_DATA_SIZE_BYTES
    }
}
